//! Quadro de tarefas gamificado.
//!
//! Cada tarefa do pool fixo vive em exatamente uma das três coleções:
//! disponíveis, atribuídas (no máximo [`MAX_ASSIGNED`]) ou concluídas.
//! A conclusão só acontece pelo motor de recompensa, depois de uma
//! transferência confirmada.

use crate::reward::RewardTransaction;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Limite de tarefas atribuídas ao mesmo tempo.
pub const MAX_ASSIGNED: usize = 5;

/// Chaves usadas no armazenamento chave-valor.
pub mod keys {
    pub const ASSIGNED: &str = "aeroband-assigned-tasks";
    pub const COMPLETED: &str = "aeroband-completed-tasks";
    pub const TOTAL_REWARDS: &str = "aeroband-total-rewards";
    pub const REWARD_HISTORY: &str = "aeroband-reward-history";
}

// ──────────────────────────────────────────────
// Modelo
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Available,
    Assigned,
    Completed,
}

/// Uma tarefa e seu estado no ciclo de vida.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u32,
    pub title: String,
    pub description: String,
    pub category: String,
    pub difficulty: Difficulty,
    pub status: TaskStatus,
    /// Unix ms da atribuição
    #[serde(default)]
    pub assigned_at: Option<u64>,
    /// Unix ms da conclusão
    #[serde(default)]
    pub completed_at: Option<u64>,
}

struct TaskTemplate {
    id: u32,
    title: &'static str,
    description: &'static str,
    category: &'static str,
    difficulty: Difficulty,
}

impl TaskTemplate {
    fn to_task(&self) -> Task {
        Task {
            id: self.id,
            title: self.title.into(),
            description: self.description.into(),
            category: self.category.into(),
            difficulty: self.difficulty,
            status: TaskStatus::Available,
            assigned_at: None,
            completed_at: None,
        }
    }
}

macro_rules! task {
    ($id:expr, $title:expr, $desc:expr, $cat:expr, $diff:ident) => {
        TaskTemplate {
            id: $id,
            title: $title,
            description: $desc,
            category: $cat,
            difficulty: Difficulty::$diff,
        }
    };
}

/// Pool fixo de tarefas.
const TASK_POOL: [TaskTemplate; 20] = [
    task!(1, "Connect IoT device to network", "Establish connection between IoT device and main network", "connectivity", Easy),
    task!(2, "Calibrate temperature sensor", "Ensure temperature readings are accurate within ±0.5°C", "calibration", Medium),
    task!(3, "Set up data logging system", "Configure automatic data collection and storage", "data", Medium),
    task!(4, "Test Bluetooth connectivity", "Verify BLE connection stability and data transfer", "connectivity", Easy),
    task!(5, "Monitor air quality for 24 hours", "Collect continuous air quality data for one full day", "monitoring", Hard),
    task!(6, "Optimize power consumption", "Reduce device power usage by 20%", "optimization", Hard),
    task!(7, "Create data visualization dashboard", "Build charts and graphs for sensor data display", "ui", Medium),
    task!(8, "Implement error handling", "Add robust error handling for device failures", "development", Medium),
    task!(9, "Test device in extreme conditions", "Verify operation in high/low temperature environments", "testing", Hard),
    task!(10, "Set up automated alerts", "Configure notifications for critical sensor readings", "automation", Medium),
    task!(11, "Backup configuration data", "Create backup of all device settings and parameters", "maintenance", Easy),
    task!(12, "Update firmware to latest version", "Install most recent device firmware update", "maintenance", Medium),
    task!(13, "Test data encryption", "Verify that all data transmission is properly encrypted", "security", Hard),
    task!(14, "Create user documentation", "Write clear instructions for device operation", "documentation", Medium),
    task!(15, "Implement data backup system", "Set up automatic data backup to cloud storage", "data", Medium),
    task!(16, "Test device range limits", "Determine maximum reliable communication distance", "testing", Hard),
    task!(17, "Optimize sensor placement", "Find optimal location for maximum sensor accuracy", "optimization", Medium),
    task!(18, "Set up remote monitoring", "Enable device monitoring from external locations", "connectivity", Hard),
    task!(19, "Test device recovery procedures", "Verify device can recover from various failure modes", "testing", Medium),
    task!(20, "Create maintenance schedule", "Develop routine maintenance checklist and timeline", "maintenance", Easy),
];

// ──────────────────────────────────────────────
// Erros
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("Limite de {MAX_ASSIGNED} tarefas ativas atingido")]
    TooManyAssigned,

    #[error("Tarefa {0} não está disponível")]
    NotAvailable(u32),

    #[error("Tarefa {0} não está atribuída")]
    NotAssigned(u32),

    #[error("Nenhuma tarefa disponível no pool")]
    PoolExhausted,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Erro de I/O em {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Valor corrompido em '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

// ──────────────────────────────────────────────
// Armazenamento chave-valor
// ──────────────────────────────────────────────

/// Armazenamento durável simples, endereçado por chaves fixas.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError>;
}

/// Armazenamento em memória (testes e execuções efêmeras).
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Armazenamento em um arquivo JSON `{ chave: valor }`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    /// Abre o arquivo; inexistente equivale a vazio.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                key: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let content = serde_json::to_string_pretty(&self.entries).map_err(|source| StoreError::Corrupt {
            key: self.path.display().to_string(),
            source,
        })?;
        // Grava em arquivo temporário e renomeia, para não deixar JSON pela metade
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        self.flush()
    }
}

// ──────────────────────────────────────────────
// Quadro
// ──────────────────────────────────────────────

/// Coleções disjuntas de tarefas e o histórico de recompensas.
#[derive(Debug, Clone)]
pub struct TaskBoard {
    available: Vec<Task>,
    assigned: Vec<Task>,
    completed: Vec<Task>,
    total_rewards: f64,
    reward_history: Vec<RewardTransaction>,
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBoard {
    /// Quadro novo com o pool inteiro disponível.
    pub fn new() -> Self {
        Self {
            available: TASK_POOL.iter().map(TaskTemplate::to_task).collect(),
            assigned: Vec::new(),
            completed: Vec::new(),
            total_rewards: 0.0,
            reward_history: Vec::new(),
        }
    }

    /// Restaura o quadro do armazenamento.
    ///
    /// As disponíveis são derivadas: pool menos atribuídas e concluídas.
    pub fn load(store: &impl KeyValueStore) -> Result<Self, StoreError> {
        let mut completed: Vec<Task> = read_json(store, keys::COMPLETED)?.unwrap_or_default();
        let mut assigned: Vec<Task> = read_json(store, keys::ASSIGNED)?.unwrap_or_default();
        let reward_history: Vec<RewardTransaction> =
            read_json(store, keys::REWARD_HISTORY)?.unwrap_or_default();
        let total_rewards = match store.get(keys::TOTAL_REWARDS)? {
            Some(raw) => raw.trim().parse::<f64>().unwrap_or_else(|_| {
                warn!("Total de recompensas inválido no armazenamento: {raw:?}");
                0.0
            }),
            None => 0.0,
        };

        // Concluída prevalece sobre atribuída; duplicatas e ids fora do pool
        // são descartados
        let known: HashSet<u32> = TASK_POOL.iter().map(|tpl| tpl.id).collect();
        let stored = completed.len() + assigned.len();
        let mut seen = HashSet::new();
        completed.retain(|t| known.contains(&t.id) && seen.insert(t.id));
        assigned.retain(|t| known.contains(&t.id) && seen.insert(t.id));
        if seen.len() < stored {
            warn!(
                "{} registros de tarefa repetidos ou desconhecidos descartados",
                stored - seen.len()
            );
        }
        if assigned.len() > MAX_ASSIGNED {
            warn!(
                "{} tarefas atribuídas no armazenamento, mantendo {MAX_ASSIGNED}",
                assigned.len()
            );
            assigned.truncate(MAX_ASSIGNED);
        }

        let mut board = Self {
            available: Vec::new(),
            assigned,
            completed,
            total_rewards,
            reward_history,
        };
        board.rebuild_available();
        debug!(
            "Quadro carregado: {} disponíveis, {} atribuídas, {} concluídas",
            board.available.len(),
            board.assigned.len(),
            board.completed.len()
        );
        Ok(board)
    }

    /// Persiste atribuídas, concluídas, total e histórico.
    pub fn save(&self, store: &mut impl KeyValueStore) -> Result<(), StoreError> {
        write_json(store, keys::ASSIGNED, &self.assigned)?;
        write_json(store, keys::COMPLETED, &self.completed)?;
        write_json(store, keys::REWARD_HISTORY, &self.reward_history)?;
        store.set(keys::TOTAL_REWARDS, self.total_rewards.to_string())
    }

    pub fn available(&self) -> &[Task] {
        &self.available
    }

    pub fn assigned(&self) -> &[Task] {
        &self.assigned
    }

    pub fn completed(&self) -> &[Task] {
        &self.completed
    }

    /// Soma das recompensas recebidas (SUI).
    pub fn total_rewards(&self) -> f64 {
        self.total_rewards
    }

    pub fn reward_history(&self) -> &[RewardTransaction] {
        &self.reward_history
    }

    pub fn find_assigned(&self, id: u32) -> Option<&Task> {
        self.assigned.iter().find(|t| t.id == id)
    }

    /// Atribui uma tarefa específica do pool disponível.
    pub fn assign(&mut self, id: u32) -> Result<&Task, TaskError> {
        if self.assigned.len() >= MAX_ASSIGNED {
            return Err(TaskError::TooManyAssigned);
        }
        let pos = self
            .available
            .iter()
            .position(|t| t.id == id)
            .ok_or(TaskError::NotAvailable(id))?;
        Ok(self.take_available(pos))
    }

    /// Atribui uma tarefa sorteada do pool disponível.
    pub fn assign_random(&mut self) -> Result<&Task, TaskError> {
        if self.assigned.len() >= MAX_ASSIGNED {
            return Err(TaskError::TooManyAssigned);
        }
        if self.available.is_empty() {
            return Err(TaskError::PoolExhausted);
        }
        let pos = rand::rng().random_range(0..self.available.len());
        Ok(self.take_available(pos))
    }

    /// Devolve uma tarefa atribuída ao pool.
    pub fn abandon(&mut self, id: u32) -> Result<(), TaskError> {
        let pos = self
            .assigned
            .iter()
            .position(|t| t.id == id)
            .ok_or(TaskError::NotAssigned(id))?;
        self.assigned.remove(pos);
        self.rebuild_available();
        Ok(())
    }

    /// Move a tarefa para concluídas e registra a recompensa.
    pub(crate) fn complete(&mut self, id: u32, tx: RewardTransaction) -> Result<(), TaskError> {
        let pos = self
            .assigned
            .iter()
            .position(|t| t.id == id)
            .ok_or(TaskError::NotAssigned(id))?;
        let mut task = self.assigned.remove(pos);
        task.status = TaskStatus::Completed;
        task.completed_at = Some(tx.timestamp_ms);
        self.completed.push(task);
        self.total_rewards += tx.amount;
        self.reward_history.push(tx);
        Ok(())
    }

    fn take_available(&mut self, pos: usize) -> &Task {
        let mut task = self.available.remove(pos);
        task.status = TaskStatus::Assigned;
        task.assigned_at = Some(crate::now_ms());
        self.assigned.push(task);
        &self.assigned[self.assigned.len() - 1]
    }

    fn rebuild_available(&mut self) {
        let taken: HashSet<u32> = self
            .assigned
            .iter()
            .chain(&self.completed)
            .map(|t| t.id)
            .collect();
        self.available = TASK_POOL
            .iter()
            .filter(|tpl| !taken.contains(&tpl.id))
            .map(TaskTemplate::to_task)
            .collect();
    }
}

fn read_json<T: serde::de::DeserializeOwned>(
    store: &impl KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    store
        .get(key)?
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
}

fn write_json<T: Serialize>(
    store: &mut impl KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })?;
    store.set(key, raw)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reward::RewardOutcome;

    fn assert_disjoint(board: &TaskBoard) {
        let mut seen = HashSet::new();
        for t in board.available().iter().chain(board.assigned()).chain(board.completed()) {
            assert!(seen.insert(t.id), "tarefa {} duplicada", t.id);
        }
        assert_eq!(seen.len(), TASK_POOL.len());
        assert!(board.assigned().len() <= MAX_ASSIGNED);
    }

    fn tx_for(task_id: u32, amount: f64) -> RewardTransaction {
        RewardTransaction {
            task_id,
            amount,
            amount_mist: (amount * 1e9).round() as u64,
            source: "0xtreasury".into(),
            destination: "0xuser".into(),
            outcome: RewardOutcome::Success,
            digest: Some("digest".into()),
            timestamp_ms: 42,
        }
    }

    #[test]
    fn new_board_has_whole_pool_available() {
        let board = TaskBoard::new();
        assert_eq!(board.available().len(), 20);
        assert!(board.assigned().is_empty());
        assert_disjoint(&board);
    }

    #[test]
    fn assigned_count_never_exceeds_five() {
        let mut board = TaskBoard::new();
        for _ in 0..MAX_ASSIGNED {
            board.assign_random().unwrap();
            assert_disjoint(&board);
        }
        assert_eq!(board.assign_random().unwrap_err(), TaskError::TooManyAssigned);
        assert_eq!(board.assign(20).unwrap_err(), TaskError::TooManyAssigned);
        assert_eq!(board.assigned().len(), MAX_ASSIGNED);
        assert_disjoint(&board);
    }

    #[test]
    fn assign_sets_status_and_timestamp() {
        let mut board = TaskBoard::new();
        let task = board.assign(5).unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert!(task.assigned_at.is_some());
        assert_eq!(board.assign(5).unwrap_err(), TaskError::NotAvailable(5));
    }

    #[test]
    fn abandon_returns_task_to_pool() {
        let mut board = TaskBoard::new();
        board.assign(3).unwrap();
        board.abandon(3).unwrap();
        let back = board.available().iter().find(|t| t.id == 3).unwrap();
        assert_eq!(back.status, TaskStatus::Available);
        assert_eq!(back.assigned_at, None);
        assert_eq!(board.abandon(3).unwrap_err(), TaskError::NotAssigned(3));
        assert_disjoint(&board);
    }

    #[test]
    fn complete_moves_task_and_accumulates_reward() {
        let mut board = TaskBoard::new();
        board.assign(5).unwrap();
        board.complete(5, tx_for(5, 0.005)).unwrap();
        assert!(board.assigned().is_empty());
        assert_eq!(board.completed()[0].status, TaskStatus::Completed);
        assert_eq!(board.completed()[0].completed_at, Some(42));
        assert_eq!(board.total_rewards(), 0.005);
        assert_eq!(board.reward_history().len(), 1);
        assert_disjoint(&board);
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let mut board = TaskBoard::new();
        for id in 1..=20 {
            board.assign(id).unwrap();
            board.complete(id, tx_for(id, 0.001)).unwrap();
        }
        assert_eq!(board.assign_random().unwrap_err(), TaskError::PoolExhausted);
        assert_disjoint(&board);
    }

    #[test]
    fn save_and_load_restore_the_board() {
        let mut board = TaskBoard::new();
        board.assign(2).unwrap();
        board.assign(9).unwrap();
        board.complete(9, tx_for(9, 0.005)).unwrap();

        let mut store = MemoryStore::default();
        board.save(&mut store).unwrap();
        assert_eq!(store.get(keys::TOTAL_REWARDS).unwrap().as_deref(), Some("0.005"));

        let restored = TaskBoard::load(&store).unwrap();
        assert_eq!(restored.assigned(), board.assigned());
        assert_eq!(restored.completed(), board.completed());
        assert_eq!(restored.available().len(), 18);
        assert_eq!(restored.total_rewards(), 0.005);
        assert_eq!(restored.reward_history(), board.reward_history());
        assert_disjoint(&restored);
    }

    #[test]
    fn load_repairs_overlapping_collections() {
        let board = {
            let mut b = TaskBoard::new();
            b.assign(1).unwrap();
            b
        };
        let mut store = MemoryStore::default();
        let task = board.assigned()[0].clone();
        store.set(keys::ASSIGNED, serde_json::to_string(&[&task, &task]).unwrap()).unwrap();
        store.set(keys::COMPLETED, serde_json::to_string(&[&task]).unwrap()).unwrap();

        let restored = TaskBoard::load(&store).unwrap();
        assert!(restored.assigned().is_empty());
        assert_eq!(restored.completed().len(), 1);
        assert_disjoint(&restored);
    }

    #[test]
    fn load_drops_repeated_and_unknown_completed_ids() {
        let mut board = TaskBoard::new();
        board.assign(4).unwrap();
        board.complete(4, tx_for(4, 0.001)).unwrap();
        let done = board.completed()[0].clone();
        let mut stray = done.clone();
        stray.id = 99;

        let mut store = MemoryStore::default();
        store
            .set(keys::COMPLETED, serde_json::to_string(&[&done, &done, &stray]).unwrap())
            .unwrap();

        let restored = TaskBoard::load(&store).unwrap();
        assert_eq!(restored.completed().len(), 1);
        assert_eq!(restored.completed()[0].id, 4);
        assert_eq!(restored.available().len(), 19);
        assert_disjoint(&restored);
    }

    #[test]
    fn corrupt_store_value_is_an_error() {
        let mut store = MemoryStore::default();
        store.set(keys::ASSIGNED, "not json".into()).unwrap();
        assert!(matches!(TaskBoard::load(&store), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn file_store_persists_between_opens() {
        let path = std::env::temp_dir().join(format!("aeroband-store-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let mut store = FileStore::open(&path).unwrap();
            store.set("k", "v".into()).unwrap();
        }
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        let _ = std::fs::remove_file(&path);
    }
}
