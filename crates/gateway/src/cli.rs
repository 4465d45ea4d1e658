//! Linha de comando do gateway e subcomandos `tasks`.

use crate::forwarder::ForwardError;
use crate::sui_rpc::SuiRpcLedger;
use crate::transport::ConnectionError;
use aeroband_core::AppConfig;
use aeroband_core::reward::{Ledger, LedgerError, MIST_PER_SUI};
use aeroband_core::tasks::{FileStore, StoreError, Task, TaskBoard, TaskError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const USAGE: &str = "\
Uso: aeroband_gateway [comando]

  run                   Conecta ao sensor e processa leituras (padrão)
  tasks list            Lista tarefas disponíveis, atribuídas e concluídas
  tasks assign [id]     Atribui a tarefa `id` (ou uma sorteada)
  tasks abandon <id>    Devolve uma tarefa atribuída ao pool
  tasks balance         Consulta o saldo da tesouraria";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    TasksList,
    TasksAssign(Option<u32>),
    TasksAbandon(u32),
    TasksBalance,
    Help,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}\n\n{USAGE}")]
    Usage(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Interpreta os argumentos (sem o nome do executável).
pub fn parse_args<I>(args: I) -> Result<Command, GatewayError>
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();
    let words: Vec<&str> = args.iter().map(String::as_str).collect();
    match words.as_slice() {
        [] | ["run"] => Ok(Command::Run),
        ["help"] | ["--help"] | ["-h"] => Ok(Command::Help),
        ["tasks"] | ["tasks", "list"] => Ok(Command::TasksList),
        ["tasks", "assign"] => Ok(Command::TasksAssign(None)),
        ["tasks", "assign", id] => Ok(Command::TasksAssign(Some(parse_id(id)?))),
        ["tasks", "abandon", id] => Ok(Command::TasksAbandon(parse_id(id)?)),
        ["tasks", "balance"] => Ok(Command::TasksBalance),
        _ => Err(GatewayError::Usage(format!("Comando inválido: {}", words.join(" ")))),
    }
}

fn parse_id(raw: &str) -> Result<u32, GatewayError> {
    raw.parse()
        .map_err(|_| GatewayError::Usage(format!("Id de tarefa inválido: {raw}")))
}

/// Caminho do armazenamento, relativo ao diretório do config.
pub fn store_path(config: &AppConfig, config_path: &Path) -> PathBuf {
    let dir = config_path.parent().unwrap_or(Path::new("."));
    dir.join(&config.storage.path)
}

/// Executa um subcomando `tasks`.
pub fn run_tasks(command: &Command, config: &AppConfig, config_path: &Path) -> Result<(), GatewayError> {
    let mut store = FileStore::open(store_path(config, config_path))?;
    let mut board = TaskBoard::load(&store)?;

    match command {
        Command::TasksList => print_board(&board),
        Command::TasksAssign(id) => {
            let task = match id {
                Some(id) => board.assign(*id)?,
                None => board.assign_random()?,
            };
            println!("Atribuída: {}", format_task(task));
            board.save(&mut store)?;
            info!("Quadro salvo em {}", store.path().display());
        }
        Command::TasksAbandon(id) => {
            board.abandon(*id)?;
            println!("Tarefa {id} devolvida ao pool");
            board.save(&mut store)?;
            info!("Quadro salvo em {}", store.path().display());
        }
        Command::TasksBalance => {
            let treasury = &config.rewards.treasury_address;
            if treasury.is_empty() {
                return Err(GatewayError::Usage("rewards.treasury_address não configurado".into()));
            }
            let ledger = SuiRpcLedger::new(&config.rewards.rpc_url, Duration::from_secs(10))?;
            let mist = ledger.balance(treasury, &config.rewards.coin_type)?;
            println!(
                "Tesouraria {treasury}: {:.9} SUI ({mist} MIST)",
                mist as f64 / MIST_PER_SUI as f64
            );
        }
        Command::Run | Command::Help => {}
    }
    Ok(())
}

fn format_task(task: &Task) -> String {
    format!(
        "#{:<2} [{:<6}] {} – {}",
        task.id, task.difficulty, task.title, task.category
    )
}

fn print_board(board: &TaskBoard) {
    println!("══════════════════════════════════════════════");
    println!("  Atribuídas ({})", board.assigned().len());
    for task in board.assigned() {
        println!("    {}", format_task(task));
    }
    println!("  Concluídas ({})", board.completed().len());
    for task in board.completed() {
        println!("    {}", format_task(task));
    }
    println!("  Disponíveis ({})", board.available().len());
    for task in board.available() {
        println!("    {}", format_task(task));
    }
    println!("──────────────────────────────────────────────");
    println!("  Total recebido: {:.3} SUI", board.total_rewards());
    println!("══════════════════════════════════════════════");
}
