//! Print the schedule held in a snapshot directory.
//!
//! Run with:
//!   cargo run --bin board_inspect -- <dir>              # list documents
//!   cargo run --bin board_inspect -- <dir> <doc-id>     # show one board

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use uuid::Uuid;

use stickyboard::{BoardState, FileSnapshotStore, Replica, ReplicaConfig, SnapshotStore};

#[derive(Parser, Debug)]
#[command(name = "board_inspect", about = "Inspect saved stickyboard documents")]
struct Args {
    /// Directory holding `.snapshot` files
    dir: PathBuf,
    /// Document to show; lists all documents when omitted
    doc: Option<Uuid>,
    /// Print the full board state as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let store = FileSnapshotStore::new(args.dir.clone())
        .await
        .with_context(|| format!("opening {}", args.dir.display()))?;

    let Some(doc_id) = args.doc else {
        for id in store.list().await? {
            println!("{}", id);
        }
        return Ok(());
    };

    let Some(replica) = Replica::load(doc_id, &store, ReplicaConfig::default()).await? else {
        bail!("no snapshot for document {}", doc_id);
    };
    let state = replica.current_state();

    if args.json {
        println!("{}", state.to_json()?);
    } else {
        print_schedule(&state);
    }
    Ok(())
}

fn print_schedule(state: &BoardState) {
    match &state.board {
        Some(board) => println!("{} ({}-minute slots)", board.title, board.slot_minutes),
        None => println!("(untitled board)"),
    }

    for room in state.rooms_in_order() {
        println!();
        match room.capacity {
            Some(capacity) => println!("{} [{}], capacity {}", room.name, room.id, capacity),
            None => println!("{} [{}]", room.name, room.id),
        }
        for placement in state.schedule_for_room(&room.id) {
            let title = state
                .sessions
                .get(&placement.session)
                .map(|s| s.title.as_str())
                .unwrap_or("?");
            println!(
                "  slots {:>3}-{:<3} {} ({})",
                placement.start_slot,
                placement.end_slot(),
                title,
                placement.session
            );
        }
    }

    let unscheduled = state.unscheduled_sessions();
    if !unscheduled.is_empty() {
        println!();
        println!("Unscheduled:");
        for session in unscheduled {
            println!(
                "  {} ({}) {}, interest {}",
                session.title, session.id, session.state, session.interest
            );
        }
    }

    println!();
    println!("digest {}", state.digest());
}
