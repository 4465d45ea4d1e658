//! Motor de recompensa em SUI.
//!
//! Fluxo de `complete_task`, cada etapa é um portão:
//!
//! ```text
//! tarefa atribuída? ─► valor por dificuldade ─► saldo da tesouraria ≥ valor?
//!        ─► carteira conectada com a conta da tesouraria?
//!        ─► coin com saldo suficiente ─► split + transfer ─► assina/executa
//!        ─► sucesso: tarefa concluída + registro + saldo em cache
//! ```
//!
//! Qualquer falha devolve um [`RewardTransaction`] com `Failure { reason }` e
//! o quadro fica intocado. Não há retry automático.

use crate::config::RewardConfig;
use crate::tasks::{Difficulty, TaskBoard};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// 1 SUI = 10^9 MIST.
pub const MIST_PER_SUI: u64 = 1_000_000_000;

/// Converte SUI para MIST, arredondando.
pub fn to_mist(amount: f64) -> u64 {
    (amount * MIST_PER_SUI as f64).round() as u64
}

// ──────────────────────────────────────────────
// Registro
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RewardOutcome {
    Success,
    Failure { reason: String },
}

/// Registro imutável de uma tentativa de recompensa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardTransaction {
    pub task_id: u32,
    /// Valor em SUI
    pub amount: f64,
    pub amount_mist: u64,
    /// Endereço da tesouraria
    pub source: String,
    pub destination: String,
    pub outcome: RewardOutcome,
    /// Digest on-chain, só em caso de sucesso
    pub digest: Option<String>,
    pub timestamp_ms: u64,
}

impl RewardTransaction {
    pub fn is_success(&self) -> bool {
        self.outcome == RewardOutcome::Success
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            RewardOutcome::Failure { reason } => Some(reason),
            RewardOutcome::Success => None,
        }
    }
}

// ──────────────────────────────────────────────
// Ledger
// ──────────────────────────────────────────────

/// Objeto coin de posse de um endereço.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinObject {
    pub object_id: String,
    pub balance: u64,
}

/// Transferência a ser montada pela carteira: `split` do valor exato a
/// partir de `coin_object_id` e `transfer` para `recipient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub sender: String,
    pub coin_type: String,
    pub coin_object_id: String,
    pub amount_mist: u64,
    pub recipient: String,
    pub gas_budget: u64,
}

/// Transação assinada, pronta para submissão.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// Bytes BCS em base64
    pub tx_bytes: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failure(String),
}

/// Efeito de uma transação executada.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub digest: String,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("Operação não suportada pelo ledger")]
    Unsupported,

    #[error("Falha de rede: {0}")]
    Network(String),

    #[error("Erro RPC {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Resposta inválida do ledger: {0}")]
    InvalidResponse(String),
}

/// Fronteira com o ledger, injetada no motor.
pub trait Ledger {
    /// Saldo total de `owner` no tipo de coin. `Unsupported` desliga o portão de saldo.
    fn balance(&self, owner: &str, coin_type: &str) -> Result<u64, LedgerError>;

    /// Coins de posse de `owner`.
    fn coins(&self, owner: &str, coin_type: &str) -> Result<Vec<CoinObject>, LedgerError>;

    /// Submete uma transação já assinada.
    fn execute(&self, signed: &SignedTransaction) -> Result<ExecutionResult, LedgerError>;
}

// ──────────────────────────────────────────────
// Carteira
// ──────────────────────────────────────────────

/// Recursos anunciados pela carteira.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalletFeatures {
    pub sign_transaction: bool,
    pub sign_and_execute_v1: bool,
    pub sign_and_execute_v2: bool,
}

/// Estratégia de assinatura resolvida uma vez na conexão.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningStrategy {
    /// Carteira só assina; o ledger executa
    SignOnly,
    SignAndExecuteV1,
    SignAndExecuteV2,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WalletError {
    #[error("Usuário rejeitou a assinatura")]
    Rejected,

    #[error("Falha na carteira: {0}")]
    Failed(String),
}

/// Carteira compatível com o wallet-standard.
pub trait Wallet {
    fn name(&self) -> &str;
    fn accounts(&self) -> Vec<String>;
    fn features(&self) -> WalletFeatures;
    fn sign_transaction(&self, plan: &TransferPlan) -> Result<SignedTransaction, WalletError>;
    fn sign_and_execute(
        &self,
        plan: &TransferPlan,
        strategy: SigningStrategy,
    ) -> Result<ExecutionResult, WalletError>;
}

/// Carteira conectada com a estratégia já negociada.
pub struct WalletSession {
    wallet: Box<dyn Wallet + Send>,
    account: Option<String>,
    strategy: SigningStrategy,
}

impl std::fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSession")
            .field("wallet", &self.wallet.name())
            .field("account", &self.account)
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl WalletSession {
    /// Resolve a estratégia preferida: V2, V1 e por fim só assinatura.
    pub fn negotiate(wallet: Box<dyn Wallet + Send>) -> Result<Self, RewardError> {
        let features = wallet.features();
        let strategy = if features.sign_and_execute_v2 {
            SigningStrategy::SignAndExecuteV2
        } else if features.sign_and_execute_v1 {
            SigningStrategy::SignAndExecuteV1
        } else if features.sign_transaction {
            SigningStrategy::SignOnly
        } else {
            return Err(RewardError::UnsupportedWallet(wallet.name().to_string()));
        };
        let account = wallet.accounts().into_iter().next();
        info!(
            "Carteira {} conectada ({:?}, conta {})",
            wallet.name(),
            strategy,
            account.as_deref().unwrap_or("-")
        );
        Ok(Self {
            wallet,
            account,
            strategy,
        })
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn strategy(&self) -> SigningStrategy {
        self.strategy
    }

    fn submit(&self, plan: &TransferPlan, ledger: &impl Ledger) -> Result<ExecutionResult, RewardError> {
        match self.strategy {
            SigningStrategy::SignOnly => {
                let signed = self.wallet.sign_transaction(plan)?;
                Ok(ledger.execute(&signed)?)
            }
            strategy => Ok(self.wallet.sign_and_execute(plan, strategy)?),
        }
    }
}

// ──────────────────────────────────────────────
// Erros
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RewardError {
    #[error("Tarefa {0} não está atribuída")]
    TaskNotAssigned(u32),

    #[error("Saldo insuficiente na tesouraria: {available} MIST (necessário {required})")]
    InsufficientTreasuryBalance { required: u64, available: u64 },

    #[error("Carteira não conectada")]
    WalletNotConnected,

    #[error("Conta da carteira {actual} não é a tesouraria {expected}")]
    AddressMismatch { expected: String, actual: String },

    #[error("Carteira {0} não suporta assinatura de transações")]
    UnsupportedWallet(String),

    #[error("Nenhuma coin da tesouraria cobre {required} MIST")]
    NoSpendableCoin { required: u64 },

    #[error("Transação {digest} falhou on-chain: {reason}")]
    Rejected { digest: String, reason: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Wallet(#[from] WalletError),
}

// ──────────────────────────────────────────────
// Motor
// ──────────────────────────────────────────────

impl RewardConfig {
    /// Valor da recompensa (SUI) para a dificuldade.
    pub fn amount_for(&self, difficulty: Difficulty) -> f64 {
        match difficulty {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }
}

/// Paga recompensas e avança o estado das tarefas.
pub struct RewardEngine<L: Ledger> {
    ledger: L,
    config: RewardConfig,
    cached_balance: Option<u64>,
}

impl<L: Ledger> RewardEngine<L> {
    pub fn new(ledger: L, config: RewardConfig) -> Self {
        Self {
            ledger,
            config,
            cached_balance: None,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Último saldo conhecido da tesouraria (MIST).
    pub fn cached_balance(&self) -> Option<u64> {
        self.cached_balance
    }

    /// Consulta o saldo de `owner` e atualiza o cache.
    pub fn refresh_balance(&mut self, owner: &str) -> Result<u64, LedgerError> {
        let balance = self.ledger.balance(owner, &self.config.coin_type)?;
        self.cached_balance = Some(balance);
        Ok(balance)
    }

    /// Conclui uma tarefa pagando a recompensa para `recipient`.
    ///
    /// A tarefa só vai para concluídas se a transferência for confirmada.
    pub fn complete_task(
        &mut self,
        board: &mut TaskBoard,
        task_id: u32,
        recipient: &str,
        wallet: Option<&WalletSession>,
    ) -> RewardTransaction {
        let amount = board
            .find_assigned(task_id)
            .map(|t| self.config.amount_for(t.difficulty))
            .unwrap_or(0.0);
        let treasury = self.treasury(wallet);

        let mut record = RewardTransaction {
            task_id,
            amount,
            amount_mist: to_mist(amount),
            source: treasury.clone().unwrap_or_default(),
            destination: recipient.to_string(),
            outcome: RewardOutcome::Success,
            digest: None,
            timestamp_ms: crate::now_ms(),
        };

        match self.transfer(board, task_id, recipient, treasury.as_deref(), wallet) {
            Ok(digest) => {
                record.digest = Some(digest);
                if let Err(e) = board.complete(task_id, record.clone()) {
                    error!("Transferência confirmada mas quadro não avançou: {e}");
                }
                info!(
                    "Tarefa {task_id} concluída: {amount} SUI → {recipient} ({})",
                    record.digest.as_deref().unwrap_or("-")
                );
            }
            Err(e) => {
                warn!("Recompensa da tarefa {task_id} falhou: {e}");
                record.outcome = RewardOutcome::Failure {
                    reason: e.to_string(),
                };
            }
        }
        record
    }

    /// Tesouraria configurada ou, na falta dela, a conta da carteira.
    fn treasury(&self, wallet: Option<&WalletSession>) -> Option<String> {
        if self.config.treasury_address.is_empty() {
            wallet.and_then(WalletSession::account).map(str::to_string)
        } else {
            Some(self.config.treasury_address.clone())
        }
    }

    fn transfer(
        &mut self,
        board: &TaskBoard,
        task_id: u32,
        recipient: &str,
        treasury: Option<&str>,
        wallet: Option<&WalletSession>,
    ) -> Result<String, RewardError> {
        // 1. Valor
        let task = board
            .find_assigned(task_id)
            .ok_or(RewardError::TaskNotAssigned(task_id))?;
        let required = to_mist(self.config.amount_for(task.difficulty));
        let treasury = treasury.ok_or(RewardError::WalletNotConnected)?;

        // 2. Saldo da tesouraria
        match self.ledger.balance(treasury, &self.config.coin_type) {
            Ok(available) => {
                self.cached_balance = Some(available);
                if available < required {
                    return Err(RewardError::InsufficientTreasuryBalance {
                        required,
                        available,
                    });
                }
            }
            Err(LedgerError::Unsupported) => debug!("Ledger sem consulta de saldo, pulando verificação"),
            Err(e) => return Err(e.into()),
        }

        // 3. Carteira com a conta da tesouraria
        let session = wallet.ok_or(RewardError::WalletNotConnected)?;
        let account = session.account().ok_or(RewardError::WalletNotConnected)?;
        if account != treasury {
            return Err(RewardError::AddressMismatch {
                expected: treasury.to_string(),
                actual: account.to_string(),
            });
        }

        // 4. Monta e submete a transferência
        let coin = self
            .ledger
            .coins(treasury, &self.config.coin_type)?
            .into_iter()
            .find(|c| c.balance >= required)
            .ok_or(RewardError::NoSpendableCoin { required })?;
        let plan = TransferPlan {
            sender: treasury.to_string(),
            coin_type: self.config.coin_type.clone(),
            coin_object_id: coin.object_id,
            amount_mist: required,
            recipient: recipient.to_string(),
            gas_budget: self.config.gas_budget,
        };
        debug!("Plano de transferência: {plan:?}");

        let result = session.submit(&plan, &self.ledger)?;
        if let ExecutionStatus::Failure(reason) = result.status {
            return Err(RewardError::Rejected {
                digest: result.digest,
                reason,
            });
        }

        // 5. Saldo em cache
        self.cached_balance = match self.ledger.balance(treasury, &self.config.coin_type) {
            Ok(balance) => Some(balance),
            Err(_) => self.cached_balance.map(|b| b.saturating_sub(required)),
        };

        Ok(result.digest)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
