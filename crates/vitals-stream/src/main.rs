// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Vital-sign streaming pipeline CLI
//!
//! # Usage
//!
//! ```bash
//! # Publish the feed to Kafka (build with --features kafka)
//! vitals-stream produce --source patient_vitals.csv --brokers localhost:9092
//!
//! # Consume the topic into SQLite
//! vitals-stream consume --database healthcare_monitoring.db --commit-policy after-write
//!
//! # Run both loops in one process over the in-memory broker
//! vitals-stream local --source patient_vitals.csv --pace-ms 0
//!
//! # Summarize stored rows
//! vitals-stream stats --database healthcare_monitoring.db
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::thread;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vitals_stream::reading::format_timestamp;
use vitals_stream::{
    CommitPolicy, MemoryBroker, PipelineConfig, PollLoop, PollOutcome, PublishLoop, RunState,
    SourceFeed, SqliteStore,
};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum PolicyArg {
    /// Position advances when a batch is delivered
    Auto,
    /// Position advances only after a successful insert
    AfterWrite,
}

impl From<PolicyArg> for CommitPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Auto => CommitPolicy::AutoAfterDelivery,
            PolicyArg::AfterWrite => CommitPolicy::AfterWrite,
        }
    }
}

/// Patient vital-sign streaming pipeline
#[derive(Parser, Debug)]
#[command(name = "vitals-stream")]
#[command(about = "Stream patient vital signs from a CSV feed through Kafka into SQLite")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish the source feed to the topic
    Produce {
        /// Source file
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Pause between publishes (milliseconds)
        #[arg(long)]
        pace_ms: Option<u64>,

        /// Bootstrap servers
        #[arg(long)]
        brokers: Option<String>,

        /// Topic name
        #[arg(long)]
        topic: Option<String>,
    },

    /// Consume the topic into the store
    Consume {
        /// SQLite database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Consumer group
        #[arg(short, long)]
        group: Option<String>,

        /// When the group position advances
        #[arg(long, value_enum)]
        commit_policy: Option<PolicyArg>,

        /// Bootstrap servers
        #[arg(long)]
        brokers: Option<String>,

        /// Topic name
        #[arg(long)]
        topic: Option<String>,
    },

    /// Run producer and consumer in one process over an in-memory broker
    Local {
        /// Source file
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// SQLite database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Pause between publishes (milliseconds)
        #[arg(long)]
        pace_ms: Option<u64>,

        /// When the group position advances
        #[arg(long, value_enum)]
        commit_policy: Option<PolicyArg>,
    },

    /// Show a summary of stored readings
    Stats {
        /// SQLite database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Generate an example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "vitals-stream.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match args.command {
        Commands::Produce {
            source,
            pace_ms,
            brokers,
            topic,
        } => {
            override_source(&mut config, source, pace_ms);
            override_channel(&mut config, brokers, topic, None);
            config.validate()?;
            cmd_produce(&config)
        }
        Commands::Consume {
            database,
            group,
            commit_policy,
            brokers,
            topic,
        } => {
            override_sink(&mut config, database, commit_policy);
            override_channel(&mut config, brokers, topic, group);
            config.validate()?;
            cmd_consume(&config)
        }
        Commands::Local {
            source,
            database,
            pace_ms,
            commit_policy,
        } => {
            override_source(&mut config, source, pace_ms);
            override_sink(&mut config, database, commit_policy);
            config.validate()?;
            cmd_local(&config)
        }
        Commands::Stats { database } => {
            override_sink(&mut config, database, None);
            cmd_stats(&config)
        }
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

fn override_source(config: &mut PipelineConfig, source: Option<PathBuf>, pace_ms: Option<u64>) {
    if let Some(path) = source {
        config.source.path = path;
    }
    if let Some(ms) = pace_ms {
        config.producer.pace_ms = ms;
    }
}

fn override_channel(
    config: &mut PipelineConfig,
    brokers: Option<String>,
    topic: Option<String>,
    group: Option<String>,
) {
    if let Some(brokers) = brokers {
        config.channel.bootstrap_servers = brokers;
    }
    if let Some(topic) = topic {
        config.channel.topic = topic;
    }
    if let Some(group) = group {
        config.channel.group_id = group;
    }
}

fn override_sink(
    config: &mut PipelineConfig,
    database: Option<PathBuf>,
    commit_policy: Option<PolicyArg>,
) {
    if let Some(path) = database {
        config.sink.database = path;
    }
    if let Some(policy) = commit_policy {
        config.consumer.commit_policy = policy.into();
    }
}

/// Stop flag wired to Ctrl+C.
fn install_stop_handler() -> Result<RunState> {
    let state = RunState::new();
    let handle = state.clone();
    ctrlc::set_handler(move || {
        handle.stop();
    })
    .context("installing Ctrl+C handler")?;
    Ok(state)
}

fn open_feed(config: &PipelineConfig) -> Result<SourceFeed<std::fs::File>> {
    SourceFeed::open(
        &config.source.path,
        config.source.delimiter_byte(),
        config.source.has_header,
    )
    .with_context(|| format!("opening source {}", config.source.path.display()))
}

fn open_store(config: &PipelineConfig) -> Result<SqliteStore> {
    SqliteStore::open(
        &config.sink.database,
        &config.sink.table,
        config.sink.create_table,
    )
    .with_context(|| format!("opening database {}", config.sink.database.display()))
}

#[cfg(feature = "kafka")]
fn cmd_produce(config: &PipelineConfig) -> Result<()> {
    use vitals_stream::channel::KafkaPublisher;

    let state = install_stop_handler()?;
    let mut feed = open_feed(config)?;
    let channel = KafkaPublisher::new(&config.channel)?;

    info!("Vitals producer v{}", env!("CARGO_PKG_VERSION"));
    info!("  Source: {}", config.source.path.display());
    info!("  Brokers: {}", config.channel.bootstrap_servers);
    info!("  Topic: {}", config.channel.topic);
    info!("Press Ctrl+C to stop.");

    let mut publisher = PublishLoop::new(config, state);
    publisher.run(&mut feed, &channel)?;

    info!(
        "Broker acknowledged {} message(s), {} failed",
        channel.acknowledged(),
        channel.failed()
    );
    Ok(())
}

#[cfg(not(feature = "kafka"))]
fn cmd_produce(_config: &PipelineConfig) -> Result<()> {
    anyhow::bail!("Kafka support not compiled in; rebuild with --features kafka or use `local`")
}

#[cfg(feature = "kafka")]
fn cmd_consume(config: &PipelineConfig) -> Result<()> {
    use vitals_stream::channel::KafkaSubscriber;

    let state = install_stop_handler()?;
    let store = open_store(config)?;
    let mut sink = store.writer()?;
    let mut channel = KafkaSubscriber::new(&config.channel, &config.consumer)?;

    info!("Vitals consumer v{}", env!("CARGO_PKG_VERSION"));
    info!("  Brokers: {}", config.channel.bootstrap_servers);
    info!("  Topic: {}", config.channel.topic);
    info!("  Group: {}", config.channel.group_id);
    info!("  Database: {}", config.sink.database.display());
    info!("Press Ctrl+C to stop.");

    let mut consumer = PollLoop::new(config, state);
    consumer.run(&mut channel, &mut sink)?;
    Ok(())
}

#[cfg(not(feature = "kafka"))]
fn cmd_consume(_config: &PipelineConfig) -> Result<()> {
    anyhow::bail!("Kafka support not compiled in; rebuild with --features kafka or use `local`")
}

fn cmd_local(config: &PipelineConfig) -> Result<()> {
    let state = install_stop_handler()?;
    let store = open_store(config)?;
    let mut sink = store.writer()?;
    let mut feed = open_feed(config)?;

    let broker = MemoryBroker::new();
    let mut channel = broker.subscriber(
        &config.channel.group_id,
        &config.channel.topic,
        config.channel.offset_reset,
        config.consumer.commit_policy,
        config.consumer.max_poll_records,
    );

    info!("Vitals pipeline v{} (in-memory broker)", env!("CARGO_PKG_VERSION"));
    info!("  Source: {}", config.source.path.display());
    info!("  Database: {}", config.sink.database.display());
    info!("  Commit policy: {:?}", config.consumer.commit_policy);
    info!("Press Ctrl+C to stop.");

    let producer = {
        let publisher = broker.publisher();
        let mut publish_loop = PublishLoop::new(config, state.clone());
        thread::Builder::new()
            .name("publisher".into())
            .spawn(move || {
                let result = publish_loop.run(&mut feed, &publisher);
                (result, publish_loop.stats().clone())
            })
            .context("spawning publisher thread")?
    };

    // Poll until the producer is done and every published message has been fetched.
    let mut consumer = PollLoop::new(config, state.clone());
    let consumed = loop {
        if !state.is_running() {
            break Ok(());
        }
        match consumer.poll_once(&mut channel, &mut sink) {
            Ok(PollOutcome::Empty) if producer.is_finished() && channel.is_caught_up() => {
                break Ok(());
            }
            Ok(_) => {}
            Err(e) => break Err(e),
        }
    };

    // Unblock the producer if the consumer gave up first.
    state.stop();
    let (published, publisher_stats) = producer
        .join()
        .map_err(|_| anyhow::anyhow!("publisher thread panicked"))?;

    let stats = consumer.stats();
    println!();
    println!("Pipeline summary");
    println!("================");
    println!("  Lines read:       {}", publisher_stats.lines_read);
    println!("  Published:        {}", publisher_stats.published);
    println!("  Malformed lines:  {}", publisher_stats.malformed);
    println!("  Received:         {}", stats.received);
    println!("  Inserted:         {}", stats.inserted);
    println!("  Decode failures:  {}", stats.decode_failures);
    println!("  Write failures:   {}", stats.write_failures);

    published.context("publisher failed")?;
    consumed.context("consumer failed")?;
    Ok(())
}

fn cmd_stats(config: &PipelineConfig) -> Result<()> {
    let store = SqliteStore::open(&config.sink.database, &config.sink.table, false)
        .with_context(|| format!("opening database {}", config.sink.database.display()))?;

    println!("Database: {}", config.sink.database.display());
    println!("Table: {}", store.table());
    println!("Readings: {}", store.count()?);
    println!("Patients: {}", store.patient_count()?);

    if let Some((earliest, latest)) = store.time_range()? {
        println!(
            "Time range: {} .. {}",
            format_timestamp(&earliest),
            format_timestamp(&latest)
        );
    }

    let by_flag = store.alert_counts()?;
    if !by_flag.is_empty() {
        println!();
        println!("Alert flags:");
        for (flag, count) in &by_flag {
            println!("  {}: {}", flag, count);
        }
    }

    Ok(())
}

fn cmd_gen_config(output: PathBuf) -> Result<()> {
    let config = PipelineConfig::default();
    let text = toml::to_string_pretty(&config).context("serializing default configuration")?;
    std::fs::write(&output, text).with_context(|| format!("writing {}", output.display()))?;
    println!("Generated configuration: {}", output.display());
    Ok(())
}
