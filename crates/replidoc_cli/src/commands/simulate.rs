//! Simulate command implementation.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use parking_lot::Mutex;
use replidoc_engine::{
    EngineError, EngineResult, HttpTransport, LoopbackClient, LoopbackEndpoint, MasterTransport,
    ReplicaHandle, Replication, ReplicationConfig, RetryConfig,
};
use replidoc_master::{MasterConfig, MasterNode};
use replidoc_protocol::{ChangeRequest, Checkpoint, Document, MasterRecord, PullStreamEvent};
use replidoc_storage::MemoryStore;
use serde::Serialize;
use tracing::debug;

const FIRST_NAMES: [&str; 6] = ["Ada", "Grace", "Alan", "Edsger", "Barbara", "Donald"];
const LAST_NAMES: [&str; 6] = ["Lovelace", "Hopper", "Turing", "Dijkstra", "Liskov", "Knuth"];

/// Outcome of one simulated replication round.
#[derive(Debug, Serialize)]
pub struct SimulateResult {
    /// Replicas that took part.
    pub replicas: usize,
    /// Documents seeded on the master up front.
    pub seeded: usize,
    /// Per-replica summaries.
    pub rounds: Vec<ReplicaRound>,
    /// Records on the master after the run, tombstones included.
    pub master_records: usize,
    /// Live documents on the master after the run.
    pub master_visible: usize,
    /// Whether every replica converged on the master state.
    pub converged: bool,
}

/// What a single replica did across the run.
#[derive(Debug, Serialize)]
pub struct ReplicaRound {
    /// Identifier from the replica's configuration.
    pub identifier: String,
    /// Documents applied from pull pages.
    pub pulled: u64,
    /// Documents the master accepted from this replica.
    pub pushed: u64,
    /// Conflicts absorbed from push responses.
    pub conflicts: u64,
    /// Visible documents held at the end.
    pub documents: usize,
}

/// Runs the simulate command.
///
/// Seeds an in-process master, catches every replica up over the loopback
/// transport, has each replica contribute and retire documents, and checks
/// that all of them converge on the master state. With `--conflict` a
/// competing write lands on the master right before the last replica's
/// push, so its edit loses and the conflict is absorbed.
pub fn run(
    replica_count: usize,
    seed_count: usize,
    force_conflict: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if replica_count == 0 {
        return Err("At least one replica is required".into());
    }

    let node = Arc::new(MasterNode::new(MasterConfig::default()));
    seed_master(&node, seed_count)?;
    debug!(replicas = replica_count, seeded = seed_count, "simulation starting");

    let mut race = None;
    let mut replicas = Vec::with_capacity(replica_count);
    for index in 0..replica_count {
        let config = ReplicationConfig::new(format!("replica-{}", index + 1))
            .one_shot()
            .with_retry(RetryConfig::no_retry());
        let transport: Arc<dyn MasterTransport> =
            if force_conflict && seed_count > 0 && index == replica_count - 1 {
                let injector = Arc::new(RaceInjector::new(Arc::clone(&node)));
                race = Some(Arc::clone(&injector));
                injector
            } else {
                Arc::new(SimTransport::new(Arc::clone(&node)))
            };
        replicas.push(Replication::new(
            config,
            Arc::new(MemoryStore::new()),
            transport,
        )?);
    }

    // First pass: everyone catches up with the seeded data.
    for replica in &replicas {
        replica.sync_once()?;
    }

    // Every replica contributes a document of its own.
    for (index, replica) in replicas.iter().enumerate() {
        let n = index + 1;
        replica.handle().upsert(Document::new(
            format!("sim-{n:02}"),
            FIRST_NAMES[index % FIRST_NAMES.len()],
            LAST_NAMES[(index + 1) % LAST_NAMES.len()],
            20 + (n % 60) as u32,
        ))?;
    }

    // The first replica retires a seeded document.
    if seed_count >= 2 {
        replicas[0].handle().remove("seed-001")?;
    }

    // The last replica edits a seeded document on a basis that a competing
    // writer is about to outdate.
    if let (Some(injector), Some(loser)) = (&race, replicas.last()) {
        let target = format!("seed-{seed_count:03}");
        loser
            .handle()
            .upsert(Document::new(&target, "Rival", "Writer", 41))?;
        injector.race_with(Document::new(&target, "Prior", "Writer", 40));
    }

    // Second pass pushes local edits; third pass spreads them everywhere.
    for replica in &replicas {
        replica.sync_once()?;
    }
    for replica in &replicas {
        replica.sync_once()?;
    }

    let committed = node.master().fetch_since(None, usize::MAX)?;
    let master_visible = committed.iter().filter(|record| !record.deleted).count();

    let mut rounds = Vec::with_capacity(replica_count);
    let mut converged = true;
    for replica in &replicas {
        let stats = replica.stats();
        converged &= replica_converged(&replica.handle(), &committed)?;
        rounds.push(ReplicaRound {
            identifier: replica.identifier().to_string(),
            pulled: stats.documents_pulled,
            pushed: stats.documents_pushed,
            conflicts: stats.conflicts_absorbed,
            documents: replica.handle().all()?.len(),
        });
    }

    let result = SimulateResult {
        replicas: replica_count,
        seeded: seed_count,
        rounds,
        master_records: committed.len(),
        master_visible,
        converged,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    if result.converged {
        Ok(())
    } else {
        Err("Replicas diverged from the master".into())
    }
}

fn seed_master(node: &Arc<MasterNode>, count: usize) -> Result<(), Box<dyn std::error::Error>> {
    if count == 0 {
        return Ok(());
    }
    let requests: Vec<ChangeRequest> = (1..=count)
        .map(|n| {
            ChangeRequest::create(Document::new(
                format!("seed-{n:03}"),
                FIRST_NAMES[(n - 1) % FIRST_NAMES.len()],
                LAST_NAMES[(n - 1) % LAST_NAMES.len()],
                20 + (n % 60) as u32,
            ))
        })
        .collect();
    node.master().apply_change_batch(requests)?;
    Ok(())
}

/// Every committed master record must be reflected locally: live records
/// with identical content and revision, tombstones as absence.
fn replica_converged(
    handle: &ReplicaHandle,
    committed: &[MasterRecord],
) -> Result<bool, Box<dyn std::error::Error>> {
    for record in committed {
        match handle.get(&record.passport_id)? {
            Some(local) if !record.deleted => {
                if local != *record {
                    return Ok(false);
                }
            }
            None if record.deleted => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

fn print_text_output(result: &SimulateResult) {
    println!("Replidoc Simulation");
    println!("===================");
    println!();
    println!("Master seeded with {} documents", result.seeded);
    println!();
    println!("Replicas:");
    for round in &result.rounds {
        println!(
            "  {}: pulled {}, pushed {}, conflicts {}, holding {} documents",
            round.identifier, round.pulled, round.pushed, round.conflicts, round.documents
        );
    }
    println!();
    println!(
        "Master: {} records, {} visible",
        result.master_records, result.master_visible
    );
    println!();
    if result.converged {
        println!("✓ All replicas converged on the master state");
    } else {
        println!("✗ Replica state diverged from the master");
    }
}

/// Serves the master's HTTP surface without a network.
struct NodeEndpoint {
    node: Arc<MasterNode>,
}

impl LoopbackEndpoint for NodeEndpoint {
    fn handle(&self, method: &str, target: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.node
            .handle(method, target, body)
            .map_err(|err| err.to_string())
    }
}

/// Bridges a replica to the in-process master over the loopback client.
struct SimTransport {
    http: HttpTransport<LoopbackClient<NodeEndpoint>>,
    node: Arc<MasterNode>,
}

impl SimTransport {
    fn new(node: Arc<MasterNode>) -> Self {
        let endpoint = NodeEndpoint {
            node: Arc::clone(&node),
        };
        Self {
            http: HttpTransport::new("http://sim.master", LoopbackClient::new(endpoint)),
            node,
        }
    }
}

impl MasterTransport for SimTransport {
    fn pull(&self, checkpoint: Option<&Checkpoint>, limit: usize) -> EngineResult<Vec<Document>> {
        self.http.pull(checkpoint, limit)
    }

    fn push(&self, requests: &[ChangeRequest]) -> EngineResult<Vec<MasterRecord>> {
        self.http.push(requests)
    }

    fn subscribe(&self) -> EngineResult<Receiver<PullStreamEvent>> {
        Ok(self.node.subscribe())
    }
}

/// Lands a competing write on the master right before the next push, so
/// the pushing replica's basis is stale by the time it arrives.
struct RaceInjector {
    inner: SimTransport,
    contender: Mutex<Option<Document>>,
}

impl RaceInjector {
    fn new(node: Arc<MasterNode>) -> Self {
        Self {
            inner: SimTransport::new(node),
            contender: Mutex::new(None),
        }
    }

    fn race_with(&self, document: Document) {
        *self.contender.lock() = Some(document);
    }
}

impl MasterTransport for RaceInjector {
    fn pull(&self, checkpoint: Option<&Checkpoint>, limit: usize) -> EngineResult<Vec<Document>> {
        self.inner.pull(checkpoint, limit)
    }

    fn push(&self, requests: &[ChangeRequest]) -> EngineResult<Vec<MasterRecord>> {
        if let Some(contender) = self.contender.lock().take() {
            let master = self.inner.node.master();
            let request = match master
                .record(&contender.passport_id)
                .map_err(|err| EngineError::transport_fatal(err.to_string()))?
            {
                Some(known) => ChangeRequest::update(known, contender),
                None => ChangeRequest::create(contender),
            };
            master
                .apply_change_batch(vec![request])
                .map_err(|err| EngineError::transport_fatal(err.to_string()))?;
        }
        self.inner.push(requests)
    }

    fn subscribe(&self) -> EngineResult<Receiver<PullStreamEvent>> {
        self.inner.subscribe()
    }
}
