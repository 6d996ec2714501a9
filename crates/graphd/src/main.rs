//! Demo binary: wires up a `ReadEngine` from CLI args and runs a single
//! illustrative request through the cache, matcher, and signature crates,
//! the way `flowctl`'s `main.rs` parses args, calls `init_logging`, and
//! dispatches into library crates.

use clap::Parser;
use graphd::{CostAccumulator, ReadEngine, ReadEngineArgs};
use graphd_constraint::{Answer, Constraint, OrMap, StringPredicate};
use graphd_guid::Guid;
use graphd_signature::{signature_hash, SignatureNode};
use graphd_store::{Primitive, ValueType};

fn main() -> Result<(), anyhow::Error> {
    let args = ReadEngineArgs::parse();
    graphd_cli::init_logging(&args.log);

    let mut engine = ReadEngine::new(&args);

    let primitive = Primitive {
        guid: Guid::new(1, 1),
        linkages: [None, None, None, None],
        generation: 1,
        timestamp: 0,
        value_type: ValueType::String,
        name: b"alice".to_vec(),
        value: Vec::new(),
        archival: false,
        live: true,
    };

    let mut con = Constraint { name: Some(StringPredicate::Glob("alice".to_string())), ..Constraint::new() };
    let mut or_map = OrMap::new();
    let matched = graphd_constraint::match_(&mut con, &mut or_map, &primitive, None);
    tracing::info!(?matched, "matched demo constraint");

    let fingerprint = signature_hash(&SignatureNode::new(con), &engine.vip);
    tracing::info!(fingerprint = %hex_digest(&fingerprint), "computed constraint signature");

    let mut cursor = String::new();
    engine.cache.freeze_fragment(&mut cursor, b"demo fragment state goes here and is long enough to be ticketed out");
    tracing::info!(cursor = %cursor, "froze demo cursor");

    let cost = CostAccumulator { dr: 1, ..Default::default() };
    tracing::info!(cost = %cost.render(), "request cost");

    if matched == Answer::No {
        anyhow::bail!("demo constraint unexpectedly failed to match");
    }
    Ok(())
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
