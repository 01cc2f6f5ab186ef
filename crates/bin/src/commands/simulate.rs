//! Simulate command - runs several rooms against an in-process server and reports
//! whether every replica ended up with the server's tree.

use std::time::{Duration, Instant};

use livetree::{
    Document, DocumentConfig, LiveValue, Op,
    crdt::CreateOp,
    room::{LocalServer, Room, ServerStorage},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cli::SimulateArgs;
use crate::output::{OutputFormat, print_table, yes_no};

const LIST_ID: &str = "0:0";
const DICT_ID: &str = "0:1";
const KEYS: [&str; 4] = ["title", "owner", "status", "color"];
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ClientReport {
    client: usize,
    actor: Option<u64>,
    items: usize,
    pending: bool,
    matches_server: bool,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    seed: u64,
    clients: usize,
    rounds: usize,
    edits: usize,
    rejected_edits: usize,
    converged: bool,
    elapsed_ms: u128,
    per_client: Vec<ClientReport>,
    snapshot: Value,
}

/// Run the simulate command
pub async fn run(args: &SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.clients == 0 {
        return Err("at least one client is required".into());
    }
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    info!(seed, clients = args.clients, rounds = args.rounds, "Starting simulation");

    let server = LocalServer::new(initial_storage()?);
    let config = DocumentConfig::default().with_throttle_ms(args.throttle_ms);
    let mut rooms = Vec::with_capacity(args.clients);
    for _ in 0..args.clients {
        let room = Room::enter(
            Document::new(config.clone()),
            Box::new(server.connect().await),
        );
        room.storage().await?;
        rooms.push(room);
    }

    let started = Instant::now();
    let (offline_from, offline_until) = (args.rounds / 3, 2 * args.rounds / 3);
    let mut offline = false;
    let mut edits = 0;
    let mut rejected_edits = 0;

    for round in 0..args.rounds {
        if args.offline && round == offline_from && !offline {
            rooms[0].disconnect().await?;
            offline = true;
            info!(round, "Client 0 went offline");
        }
        if offline && round == offline_until {
            rooms[0].reconnect(Box::new(server.connect().await)).await?;
            offline = false;
            info!(round, "Client 0 reconnected");
        }

        for (client, room) in rooms.iter().enumerate() {
            let result = room
                .mutate(|doc| random_edit(doc, &mut rng, args.moves, client, round))
                .await;
            edits += 1;
            if let Err(err) = result {
                rejected_edits += 1;
                debug!(client, round, error = %err, "Edit rejected");
            }
        }

        let pause = rng.gen_range(0..=args.throttle_ms.max(1));
        tokio::time::sleep(Duration::from_millis(pause)).await;
    }

    if offline {
        rooms[0].reconnect(Box::new(server.connect().await)).await?;
    }
    for room in &rooms {
        room.flush().await?;
    }
    let converged = settle(&server, &rooms).await?;

    let snapshot = server.snapshot().await?;
    let mut per_client = Vec::with_capacity(rooms.len());
    for (client, room) in rooms.iter().enumerate() {
        let (actor, local, pending) = room
            .read(|doc| (doc.actor(), doc.snapshot(), doc.has_pending_changes()))
            .await;
        per_client.push(ClientReport {
            client,
            actor,
            items: item_count(&local),
            pending,
            matches_server: local == snapshot,
        });
    }
    for room in rooms {
        room.close().await?;
    }

    let report = SimulationReport {
        seed,
        clients: args.clients,
        rounds: args.rounds,
        edits,
        rejected_edits,
        converged,
        elapsed_ms: started.elapsed().as_millis(),
        per_client,
        snapshot,
    };
    print_report(&report, args.format)?;

    if !report.converged {
        return Err(format!("replicas diverged (seed {seed})").into());
    }
    Ok(())
}

/// Server storage holding an empty list at `root.items` and an empty dictionary at
/// `root.tags`.
fn initial_storage() -> Result<ServerStorage, Box<dyn std::error::Error>> {
    let mut storage = ServerStorage::default();
    let output = storage.apply(vec![
        Op::CreateList(CreateOp::new(LIST_ID.into(), "root".into(), "items".into())),
        Op::CreateDict(CreateOp::new(DICT_ID.into(), "root".into(), "tags".into())),
    ]);
    if !output.to_sender.is_empty() {
        return Err("initial storage rejected its own nodes".into());
    }
    Ok(storage)
}

fn random_edit(
    doc: &mut Document,
    rng: &mut StdRng,
    moves: bool,
    client: usize,
    round: usize,
) -> livetree::Result<()> {
    let label = format!("c{client}-r{round}");
    let len = doc.list(LIST_ID)?.len();
    let choices = if moves { 7 } else { 6 };

    match rng.gen_range(0..choices) {
        1 => {
            let index = rng.gen_range(0..=len);
            doc.list(LIST_ID)?.insert(index, label)
        }
        2 if len > 0 => {
            let index = rng.gen_range(0..len);
            doc.list(LIST_ID)?.delete(index)
        }
        3 => {
            let key = KEYS[rng.gen_range(0..KEYS.len())];
            doc.root()?.set(key, label)
        }
        4 => {
            let key = KEYS[rng.gen_range(0..KEYS.len())];
            doc.dict(DICT_ID)?.set(key, label)
        }
        5 => doc.list(LIST_ID)?.push(LiveValue::record([
            ("label", LiveValue::from(label)),
            ("done", LiveValue::from(false)),
        ])),
        6 if len > 1 => {
            let from = rng.gen_range(0..len);
            let to = rng.gen_range(0..len);
            doc.list(LIST_ID)?.move_item(from, to)
        }
        _ => doc.list(LIST_ID)?.push(label),
    }
}

/// Polls until every room matches the server with nothing in flight.
async fn settle(server: &LocalServer, rooms: &[Room]) -> livetree::Result<bool> {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    loop {
        let expected = server.snapshot().await?;
        let mut settled = true;
        for room in rooms {
            let (snapshot, pending) = room
                .read(|doc| (doc.snapshot(), doc.has_pending_changes()))
                .await;
            if pending || snapshot != expected {
                settled = false;
                break;
            }
        }
        if settled {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            warn!(timeout = ?SETTLE_TIMEOUT, "Rooms did not settle");
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn item_count(snapshot: &Value) -> usize {
    snapshot["items"].as_array().map_or(0, Vec::len)
}

fn print_report(
    report: &SimulationReport,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Human => {
            println!("Seed:        {}", report.seed);
            println!("Clients:     {}", report.clients);
            println!("Rounds:      {}", report.rounds);
            println!(
                "Edits:       {} ({} rejected)",
                report.edits, report.rejected_edits
            );
            println!("Elapsed:     {} ms", report.elapsed_ms);
            println!("Converged:   {}", yes_no(report.converged));
            println!();

            let rows: Vec<Vec<String>> = report
                .per_client
                .iter()
                .map(|client| {
                    vec![
                        client.client.to_string(),
                        client
                            .actor
                            .map_or_else(|| "-".to_string(), |actor| actor.to_string()),
                        client.items.to_string(),
                        yes_no(client.pending).to_string(),
                        yes_no(client.matches_server).to_string(),
                    ]
                })
                .collect();
            print_table(&["CLIENT", "ACTOR", "ITEMS", "PENDING", "MATCHES"], &rows);
            println!();
            println!("{}", serde_json::to_string_pretty(&report.snapshot)?);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(report)?);
        }
    }
    Ok(())
}
