//! Cliente JSON-RPC do fullnode Sui, implementando [`Ledger`].
//!
//! O binário só consulta `balance` (`tasks balance`). `coins` e `execute`
//! existem para quem monta um `RewardEngine` com uma carteira própria:
//! `RewardEngine::new(SuiRpcLedger::new(url, timeout)?, config)`.

use aeroband_core::reward::{CoinObject, ExecutionResult, ExecutionStatus, Ledger, LedgerError, SignedTransaction};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Código JSON-RPC de método inexistente.
const METHOD_NOT_FOUND: i64 = -32601;

/// Coins pedidas por página em `suix_getCoins`.
const COIN_PAGE_LIMIT: u32 = 50;

pub struct SuiRpcLedger {
    client: reqwest::blocking::Client,
    url: String,
    next_id: AtomicU64,
}

impl SuiRpcLedger {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!("→ {method} #{id}");

        let response: Value = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| LedgerError::Network(e.to_string()))?
            .json()
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

        parse_response(response)
    }
}

impl Ledger for SuiRpcLedger {
    fn balance(&self, owner: &str, coin_type: &str) -> Result<u64, LedgerError> {
        let result = self.call("suix_getBalance", json!([owner, coin_type]))?;
        parse_balance(&result)
    }

    fn coins(&self, owner: &str, coin_type: &str) -> Result<Vec<CoinObject>, LedgerError> {
        let mut coins = Vec::new();
        let mut cursor = Value::Null;
        loop {
            let result = self.call(
                "suix_getCoins",
                json!([owner, coin_type, cursor, COIN_PAGE_LIMIT]),
            )?;
            let page = parse_coin_page(&result)?;
            coins.extend(page.coins);
            match page.next_cursor {
                Some(next) => cursor = Value::String(next),
                None => return Ok(coins),
            }
        }
    }

    fn execute(&self, signed: &SignedTransaction) -> Result<ExecutionResult, LedgerError> {
        let result = self.call(
            "sui_executeTransactionBlock",
            json!([
                signed.tx_bytes,
                [signed.signature],
                { "showEffects": true },
                "WaitForLocalExecution",
            ]),
        )?;
        parse_execution(&result)
    }
}

// ──────────────────────────────────────────────
// Parsing das respostas
// ──────────────────────────────────────────────

/// Separa `result` de `error` no envelope JSON-RPC.
fn parse_response(mut response: Value) -> Result<Value, LedgerError> {
    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code == METHOD_NOT_FOUND {
            return Err(LedgerError::Unsupported);
        }
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("erro sem mensagem")
            .to_string();
        return Err(LedgerError::Rpc { code, message });
    }
    match response.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(LedgerError::InvalidResponse("envelope sem result".into())),
    }
}

/// Valores u64 chegam como string decimal.
fn parse_amount(value: Option<&Value>, field: &str) -> Result<u64, LedgerError> {
    match value {
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| LedgerError::InvalidResponse(format!("{field} inválido: {s:?}"))),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| LedgerError::InvalidResponse(format!("{field} inválido: {n}"))),
        _ => Err(LedgerError::InvalidResponse(format!("{field} ausente"))),
    }
}

fn parse_balance(result: &Value) -> Result<u64, LedgerError> {
    parse_amount(result.get("totalBalance"), "totalBalance")
}

#[derive(Debug)]
struct CoinPage {
    coins: Vec<CoinObject>,
    next_cursor: Option<String>,
}

fn parse_coin_page(result: &Value) -> Result<CoinPage, LedgerError> {
    let data = result
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| LedgerError::InvalidResponse("data ausente".into()))?;

    let coins = data
        .iter()
        .map(|coin| {
            let object_id = coin
                .get("coinObjectId")
                .and_then(Value::as_str)
                .ok_or_else(|| LedgerError::InvalidResponse("coinObjectId ausente".into()))?;
            Ok(CoinObject {
                object_id: object_id.to_string(),
                balance: parse_amount(coin.get("balance"), "balance")?,
            })
        })
        .collect::<Result<Vec<_>, LedgerError>>()?;

    let has_next = result.get("hasNextPage").and_then(Value::as_bool).unwrap_or(false);
    let next_cursor = if has_next {
        result.get("nextCursor").and_then(Value::as_str).map(str::to_string)
    } else {
        None
    };

    Ok(CoinPage { coins, next_cursor })
}

fn parse_execution(result: &Value) -> Result<ExecutionResult, LedgerError> {
    let digest = result
        .get("digest")
        .and_then(Value::as_str)
        .ok_or_else(|| LedgerError::InvalidResponse("digest ausente".into()))?
        .to_string();

    let status = &result["effects"]["status"];
    let status = match status.get("status").and_then(Value::as_str) {
        Some("success") => ExecutionStatus::Success,
        Some(_) => ExecutionStatus::Failure(
            status
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("falha sem detalhe")
                .to_string(),
        ),
        None => return Err(LedgerError::InvalidResponse("effects.status ausente".into())),
    };

    Ok(ExecutionResult { digest, status })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::JoinHandle;

    /// Servidor HTTP que responde cada conexão com o próximo corpo da lista
    /// e devolve as requisições JSON-RPC recebidas.
    fn canned_server(responses: Vec<Value>) -> (String, JoinHandle<Vec<Value>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            responses
                .iter()
                .map(|body| {
                    let (stream, _) = listener.accept().unwrap();
                    answer(stream, body)
                })
                .collect()
        });
        (url, handle)
    }

    fn answer(mut stream: TcpStream, body: &Value) -> Value {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" || line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
        }
        let mut request = vec![0u8; content_length];
        reader.read_exact(&mut request).unwrap();

        let payload = body.to_string();
        write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            payload.len(),
            payload
        )
        .unwrap();
        serde_json::from_slice(&request).unwrap()
    }

    fn ledger(url: String) -> SuiRpcLedger {
        SuiRpcLedger {
            client: reqwest::blocking::Client::builder()
                .no_proxy()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap(),
            url,
            next_id: AtomicU64::new(1),
        }
    }

    #[test]
    fn coins_follow_the_cursor_across_pages() {
        let (url, server) = canned_server(vec![
            json!({"jsonrpc": "2.0", "id": 1, "result": {
                "data": [{"coinObjectId": "0xa1", "balance": "7000000"}],
                "nextCursor": "0xa1",
                "hasNextPage": true
            }}),
            json!({"jsonrpc": "2.0", "id": 2, "result": {
                "data": [{"coinObjectId": "0xb2", "balance": "9"}],
                "nextCursor": null,
                "hasNextPage": false
            }}),
        ]);

        let coins = ledger(url).coins("0xtreasury", "0x2::sui::SUI").unwrap();
        assert_eq!(
            coins,
            vec![
                CoinObject { object_id: "0xa1".into(), balance: 7_000_000 },
                CoinObject { object_id: "0xb2".into(), balance: 9 },
            ]
        );

        let requests = server.join().unwrap();
        assert_eq!(requests[0]["method"], "suix_getCoins");
        assert_eq!(requests[0]["params"], json!(["0xtreasury", "0x2::sui::SUI", null, 50]));
        assert_eq!(requests[1]["params"][2], "0xa1");
        assert_ne!(requests[0]["id"], requests[1]["id"]);
    }

    #[test]
    fn execute_submits_signed_bytes_and_waits_for_effects() {
        let (url, server) = canned_server(vec![json!({"jsonrpc": "2.0", "id": 1, "result": {
            "digest": "D9",
            "effects": {"status": {"status": "success"}}
        }})]);

        let signed = SignedTransaction {
            tx_bytes: "AAAB".into(),
            signature: "c2ln".into(),
        };
        let result = ledger(url).execute(&signed).unwrap();
        assert_eq!(result, ExecutionResult { digest: "D9".into(), status: ExecutionStatus::Success });

        let requests = server.join().unwrap();
        assert_eq!(requests[0]["method"], "sui_executeTransactionBlock");
        assert_eq!(
            requests[0]["params"],
            json!(["AAAB", ["c2ln"], {"showEffects": true}, "WaitForLocalExecution"])
        );
    }

    #[test]
    fn result_is_unwrapped_from_envelope() {
        let resp = json!({"jsonrpc": "2.0", "id": 1, "result": {"totalBalance": "42"}});
        let result = parse_response(resp).unwrap();
        assert_eq!(parse_balance(&result).unwrap(), 42);
    }

    #[test]
    fn rpc_errors_are_typed() {
        let resp = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32602, "message": "Invalid params"}});
        assert_eq!(
            parse_response(resp).unwrap_err(),
            LedgerError::Rpc {
                code: -32602,
                message: "Invalid params".into()
            }
        );

        let resp = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "Method not found"}});
        assert_eq!(parse_response(resp).unwrap_err(), LedgerError::Unsupported);

        assert!(matches!(
            parse_response(json!({"jsonrpc": "2.0", "id": 1})),
            Err(LedgerError::InvalidResponse(_))
        ));
    }

    #[test]
    fn balance_requires_decimal_string() {
        let result = json!({"coinType": "0x2::sui::SUI", "coinObjectCount": 2, "totalBalance": "1000000000"});
        assert_eq!(parse_balance(&result).unwrap(), 1_000_000_000);
        assert!(parse_balance(&json!({"totalBalance": "muito"})).is_err());
        assert!(parse_balance(&json!({})).is_err());
    }

    #[test]
    fn coin_page_with_cursor() {
        let result = json!({
            "data": [
                {"coinType": "0x2::sui::SUI", "coinObjectId": "0xa1", "version": "7", "balance": "5000000"},
                {"coinType": "0x2::sui::SUI", "coinObjectId": "0xb2", "version": "9", "balance": "12"}
            ],
            "nextCursor": "0xb2",
            "hasNextPage": true
        });
        let page = parse_coin_page(&result).unwrap();
        assert_eq!(
            page.coins,
            vec![
                CoinObject { object_id: "0xa1".into(), balance: 5_000_000 },
                CoinObject { object_id: "0xb2".into(), balance: 12 },
            ]
        );
        assert_eq!(page.next_cursor.as_deref(), Some("0xb2"));

        let last = json!({"data": [], "nextCursor": "0xb2", "hasNextPage": false});
        assert_eq!(parse_coin_page(&last).unwrap().next_cursor, None);
    }

    #[test]
    fn execution_status() {
        let ok = json!({"digest": "D1", "effects": {"status": {"status": "success"}}});
        assert_eq!(
            parse_execution(&ok).unwrap(),
            ExecutionResult { digest: "D1".into(), status: ExecutionStatus::Success }
        );

        let failed = json!({"digest": "D2", "effects": {"status": {"status": "failure", "error": "InsufficientGas"}}});
        assert_eq!(
            parse_execution(&failed).unwrap().status,
            ExecutionStatus::Failure("InsufficientGas".into())
        );

        assert!(parse_execution(&json!({"digest": "D3"})).is_err());
    }
}
