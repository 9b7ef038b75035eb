use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use blocklog_codec::{BlockState, ContainerSnapshot, ItemStack, StateCodec};
use blocklog_common::{Actor, BlockPos, WorldId, epoch_now};
use blocklog_kernel::{BlockWorld, ExecutionContext, WorldAccess};
use blocklog_persist::{ActionStore, AreaQuery, SCHEMA_VERSION, StoreConfig, StoredAction};
use blocklog_rollback::{
    Orchestrator, Page, PurgeParams, RollbackParams, RollbackRequest, SessionRestore,
    format_history_line, relative_age,
};

#[derive(Parser)]
#[command(name = "blocklog-cli", about = "Inspect and maintain a blocklog database")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML store configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file, overriding the configured path
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version, schema and store counters
    Info,
    /// History of a single position
    History {
        #[arg(short, long, default_value = "minecraft:overworld")]
        world: String,
        /// Position as x,y,z
        #[arg(short, long, value_parser = parse_pos, allow_hyphen_values = true)]
        at: BlockPos,
        #[arg(short, long, default_value = "1")]
        page: usize,
    },
    /// History around a position, filtered by operator parameters
    Lookup {
        #[arg(short, long, default_value = "minecraft:overworld")]
        world: String,
        /// Center as x,y,z
        #[arg(short, long, value_parser = parse_pos, allow_hyphen_values = true)]
        at: BlockPos,
        /// Parameters such as "t:1h r:10 u:Nick"
        #[arg(long, default_value = "")]
        params: String,
        #[arg(short, long, default_value = "1")]
        page: usize,
    },
    /// List what a rollback with these parameters would revert, newest first
    RollbackPlan {
        #[arg(short, long, default_value = "minecraft:overworld")]
        world: String,
        /// Center as x,y,z
        #[arg(short, long, value_parser = parse_pos, allow_hyphen_values = true)]
        at: BlockPos,
        /// Parameters such as "t:1h r:10 u:Nick"
        #[arg(long, default_value = "")]
        params: String,
    },
    /// Recent rollback sessions
    Sessions {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Delete old records, e.g. "t:30d r:overworld i:stone,dirt #optimize"
    Purge {
        params: String,
    },
    /// Drive an in-memory world through logging, rollback and restore
    Demo,
}

fn parse_pos(s: &str) -> Result<BlockPos, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, z] = parts.as_slice() else {
        return Err(format!("expected x,y,z, got '{s}'"));
    };
    let coord = |v: &str| v.parse::<i32>().map_err(|e| format!("bad coordinate '{v}': {e}"));
    Ok(BlockPos::new(coord(x)?, coord(y)?, coord(z)?))
}

fn store_config(path: Option<&Path>, db: Option<PathBuf>) -> anyhow::Result<StoreConfig> {
    let mut config = match path {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(db) = db {
        config.path = db;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Demo => demo(),
        command => {
            let config = store_config(cli.config.as_deref(), cli.db)?;
            run(command, config)
        }
    }
}

fn run(command: Commands, config: StoreConfig) -> anyhow::Result<()> {
    let page_size = config.effective_page_size();
    let store = ActionStore::open(config.clone())
        .with_context(|| format!("opening {}", config.path.display()))?;
    let codec = StateCodec::new();
    let now = epoch_now();

    match command {
        Commands::Info => {
            println!("blocklog-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("database: {}", config.path.display());
            println!("schema: v{SCHEMA_VERSION}");
            println!("records: {}", store.record_count());
            println!("sessions: {}", store.session_count());
            println!("stats: {}", serde_json::to_string(&store.stats())?);
        }
        Commands::History { world, at, page } => {
            let world = WorldId::new(world);
            let page = Page::new(page, page_size);
            let total = store.count_at(&world, at);
            let rows = store.history_at(&world, at, page.size, page.offset());
            println!("----- history at {at} in {world} -----");
            print_rows(&codec, &rows, now);
            println!("{}", page.pager(total));
        }
        Commands::Lookup {
            world,
            at,
            params,
            page,
        } => {
            let params = RollbackParams::parse(&params)?;
            let mut query = AreaQuery::new(world, at, params.radius).since(params.since(now));
            query.actor = params.actor.clone();
            let page = Page::new(page, page_size);
            let total = store.count_lookup(&query);
            let rows = store.lookup_history(&query, page.size, page.offset());
            println!("----- lookup {params} around {at} -----");
            print_rows(&codec, &rows, now);
            println!("{}", page.pager(total));
        }
        Commands::RollbackPlan { world, at, params } => {
            let params = RollbackParams::parse(&params)?;
            let request = RollbackRequest::new(world, at, params).at(now);
            let candidates = store.actions_for_rollback(&request.query());
            println!(
                "{} action(s) would be reverted ({})",
                candidates.len(),
                request.params
            );
            print_rows(&codec, &candidates, now);
        }
        Commands::Sessions { limit } => {
            for session in store.recent_sessions(limit) {
                println!(
                    "#{} {} by {} [{}]{}",
                    session.id,
                    relative_age(now - session.time),
                    session.executor,
                    session.params,
                    if session.restored { " restored" } else { "" }
                );
            }
        }
        Commands::Purge { params } => {
            let params = PurgeParams::parse(&params)?;
            let deleted = store.purge(&params.to_filter(now))?;
            println!("purged {deleted} record(s)");
        }
        Commands::Demo => demo()?,
    }

    store.close();
    Ok(())
}

fn print_rows(codec: &StateCodec, rows: &[StoredAction], now: i64) {
    if rows.is_empty() {
        println!("no history found");
    }
    for row in rows {
        println!(
            "{} ({})",
            format_history_line(codec, &row.record, now),
            row.record.pos
        );
    }
}

fn demo() -> anyhow::Result<()> {
    let store = ActionStore::open(StoreConfig::in_memory())?;
    let codec = StateCodec::new();
    let overworld = WorldId::new("minecraft:overworld");
    let mut world = BlockWorld::new()
        .with_world(overworld.clone())
        .with_sink(Arc::new(store.clone()));
    let ctx = ExecutionContext::new();

    let alice = Actor::named("Alice");
    let bob = Actor::named("Bob");
    let chest_pos = BlockPos::new(0, 64, 2);

    for x in -1..=1 {
        world.place_block(
            &alice,
            &overworld,
            BlockPos::new(x, 64, 0),
            BlockState::new("minecraft:stone_bricks"),
            &ctx,
        )?;
    }
    world.place_block(
        &alice,
        &overworld,
        chest_pos,
        BlockState::new("minecraft:chest").with_property("facing", "north"),
        &ctx,
    )?;
    world.set_container_as(
        &alice,
        &overworld,
        chest_pos,
        ContainerSnapshot::from_slots([
            (0, ItemStack::new("minecraft:diamond", 3)),
            (1, ItemStack::new("minecraft:bread", 16)),
        ]),
        &ctx,
    )?;

    world.break_block(&bob, &overworld, BlockPos::new(0, 64, 0), &ctx)?;
    world.place_block(
        &bob,
        &overworld,
        BlockPos::new(1, 64, 0),
        BlockState::new("minecraft:tnt"),
        &ctx,
    )?;
    world.set_container_as(
        &bob,
        &overworld,
        chest_pos,
        ContainerSnapshot::from_slots([(1, ItemStack::new("minecraft:bread", 16))]),
        &ctx,
    )?;
    store.flush();

    let now = epoch_now();
    let query = AreaQuery::new(overworld.clone(), BlockPos::new(0, 64, 0), 5);
    println!("----- after Bob -----");
    print_rows(&codec, &store.lookup_history(&query, 20, 0), now);

    let orchestrator = Orchestrator::new(&store, &codec);
    let params = RollbackParams::parse("t:1h r:5 u:bob")?;
    let request = RollbackRequest::new(overworld.clone(), BlockPos::new(0, 64, 0), params);
    let report = orchestrator.rollback(&mut world, &ctx, "Operator", &request)?;
    println!("rollback: {report}");
    print_wall(&world, &overworld, chest_pos)?;

    if let Some(session_id) = report.session_id {
        match orchestrator.restore_session(&mut world, &ctx, session_id)? {
            SessionRestore::Restored(restored) => println!("restore: {restored}"),
            SessionRestore::NotFound(id) => println!("session #{id} had nothing to restore"),
        }
    }
    print_wall(&world, &overworld, chest_pos)?;

    store.flush();
    println!("stats: {}", serde_json::to_string(&store.stats())?);
    store.close();
    Ok(())
}

fn print_wall(world: &BlockWorld, overworld: &WorldId, chest_pos: BlockPos) -> anyhow::Result<()> {
    let wall = (-1..=1)
        .map(|x| world.block_state(overworld, BlockPos::new(x, 64, 0)))
        .collect::<Result<Vec<_>, _>>()?;
    let wall: Vec<String> = wall.iter().map(ToString::to_string).collect();
    println!("  wall: {}", wall.join(" | "));
    println!("  chest: {}", world.container_contents(overworld, chest_pos)?.totals());
    Ok(())
}
