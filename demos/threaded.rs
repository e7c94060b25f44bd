//! ## Example usage of [`bd_gka`].
//!
//! Each participant is represented by a worker thread owning one
//! [`Participant`] instance. A coordinator on the main thread routes
//! broadcast messages between workers over [`std::sync::mpsc`] channels and
//! stops once every worker reports a derived session key.
//!
//! # Warning: Trust Model
//! This example does not implement sender authentication, which is required
//! for a secure deployment: the coordinator is trusted to route messages
//! correctly and to attach the right sender id to each delivery. Sender
//! authentication is omitted from this code for brevity.

// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use std::{
    collections::HashMap,
    sync::mpsc::{channel, Receiver, Sender},
    thread,
};

use bd_gka::{crypto::Secp256k1Suite, Broadcaster, Message, Participant, ParticipantId};
use clap::Parser;
use rand::rngs::OsRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of participants in the session.
    #[arg(short, long, default_value_t = 3)]
    participants: u64,
}

/// Message from a worker to the routing coordinator.
enum WorkerReport {
    /// A protocol message this worker wants broadcast to everyone else.
    Broadcast(ParticipantId, Message),
    /// A session key was installed; the payload is its fingerprint.
    KeyInstalled(ParticipantId, String),
}

/// Message from the coordinator instructing a worker.
enum Instruction {
    /// Begin a rekey cycle (sent to the elected initiator only).
    Start,
    /// Deliver a protocol message from another worker.
    Deliver(ParticipantId, Message),
    /// Tear down the worker.
    Shutdown,
}

/// Broadcast sink that relays everything to the coordinator.
struct RelaySink {
    id: ParticipantId,
    out: Sender<WorkerReport>,
}

impl Broadcaster for RelaySink {
    fn broadcast(&mut self, message: Message) {
        // Channel teardown during shutdown is not an error here.
        let _ = self.out.send(WorkerReport::Broadcast(self.id, message));
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    bytes.iter().take(8).map(|byte| format!("{byte:02x}")).collect()
}

fn worker(
    id: ParticipantId,
    others: Vec<ParticipantId>,
    inbox: Receiver<Instruction>,
    out: Sender<WorkerReport>,
) {
    let sink = RelaySink {
        id,
        out: out.clone(),
    };
    let mut participant = Participant::<Secp256k1Suite>::new(Box::new(sink));
    participant.set_my_id(id);
    for other in others {
        participant.add_member(other).expect("roster update failed");
    }

    let mut reported = 0;
    for instruction in inbox {
        match instruction {
            Instruction::Start => participant.start(&mut OsRng).expect("start failed"),
            Instruction::Deliver(from, message) => participant
                .process_message(&mut OsRng, from, &message)
                .expect("message processing failed"),
            Instruction::Shutdown => break,
        }
        if let Some(key) = participant.key() {
            if key.counter() > reported {
                reported = key.counter();
                let _ = out.send(WorkerReport::KeyInstalled(
                    id,
                    fingerprint(key.key().as_bytes()),
                ));
            }
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    let size = cli.participants.max(2);
    let ids: Vec<ParticipantId> = (1..=size).map(ParticipantId::new).collect();

    let (report_tx, report_rx) = channel();
    let mut instruction_txs: HashMap<ParticipantId, Sender<Instruction>> = HashMap::new();
    let mut handles = Vec::new();
    for &id in &ids {
        let (tx, rx) = channel();
        let _ = instruction_txs.insert(id, tx);
        let others: Vec<ParticipantId> =
            ids.iter().copied().filter(|&other| other != id).collect();
        let out = report_tx.clone();
        handles.push(thread::spawn(move || worker(id, others, rx, out)));
    }
    drop(report_tx);

    // The smallest id is the elected initiator.
    instruction_txs[&ids[0]]
        .send(Instruction::Start)
        .expect("initiator worker is gone");

    let mut keys: HashMap<ParticipantId, String> = HashMap::new();
    while keys.len() < ids.len() {
        match report_rx.recv().expect("all workers exited early") {
            WorkerReport::Broadcast(from, message) => {
                for (&to, tx) in &instruction_txs {
                    if to != from {
                        tx.send(Instruction::Deliver(from, message.clone()))
                            .expect("worker is gone");
                    }
                }
            }
            WorkerReport::KeyInstalled(id, print) => {
                info!("participant {id} installed key {print}");
                let _ = keys.insert(id, print);
            }
        }
    }

    for tx in instruction_txs.values() {
        let _ = tx.send(Instruction::Shutdown);
    }
    for handle in handles {
        let _ = handle.join();
    }

    let reference = keys[&ids[0]].clone();
    let agreed = keys.values().all(|print| *print == reference);
    println!(
        "{} participants agreed on key {reference}: {agreed}",
        ids.len()
    );
}
