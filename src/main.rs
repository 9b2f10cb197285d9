//! Millbook main entry point

use anyhow::Context;
use chrono::Datelike;
use clap::Parser;
use millbook_config::{Config, TimeRange};
use millbook_core::reports::format_amount;
use millbook_core::time::{self, DateRange};
use millbook_core::{DateFilter, EntityType, EntityTypeSummary, MemoryStore, Session, StoreRef};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "millbook")]
#[command(author = "Millbook Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Reconciled ledger balances for timber-mill bookkeeping", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Entity type to report (all ledger types when omitted)
    #[arg(short, long)]
    entity: Option<EntityType>,

    /// Quick range: day, week, month, year or all
    #[arg(short, long)]
    range: Option<TimeRange>,

    /// Explicit year (drill-down)
    #[arg(long)]
    year: Option<i32>,

    /// Month 1-12 within --year or the current year (drill-down)
    #[arg(long)]
    month: Option<u32>,

    /// Week 1-5 within the selected month (drill-down)
    #[arg(long, requires = "month")]
    week: Option<usize>,

    /// Start bound (YYYY-MM-DD); unparsable input leaves the bound open
    #[arg(long)]
    from: Option<String>,

    /// End bound (YYYY-MM-DD), inclusive
    #[arg(long)]
    to: Option<String>,

    /// Print summaries as JSON
    #[arg(long)]
    json: bool,

    /// Print the default configuration and exit
    #[arg(long)]
    print_default_config: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        print!("{}", Config::generate_default());
        return Ok(());
    }

    let config = Config::load(args.config.clone())
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!(
        "Config loaded: seed file={}, offset={} min",
        config.store.seed_file.display(),
        config.time_range.utc_offset_minutes
    );

    let rt = Runtime::new()?;
    rt.block_on(run(args, config))
}

async fn run(args: Args, config: Config) -> anyhow::Result<()> {
    let store: StoreRef = Arc::new(load_store(&config)?);
    let session = Session::open(config, store)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.to_details()))?;

    let entity_types: Vec<EntityType> = match args.entity {
        Some(entity_type) => vec![entity_type],
        None => EntityType::ALL
            .iter()
            .copied()
            .filter(|t| t.ledger_collections().is_some())
            .collect(),
    };

    let (label, filter) = select_filter(&args, &session)?;
    log::info!("Reporting {} entity type(s) for {}", entity_types.len(), label);

    let mut summaries = Vec::new();
    for entity_type in entity_types {
        if let Err(e) = session.watch(entity_type).await {
            log::error!("Could not subscribe to {}: {}", entity_type, e);
            continue;
        }
        match session.summary(entity_type, &filter) {
            Some(summary) => summaries.push(summary),
            None => log::warn!("{} keeps no ledger; skipping", entity_type),
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        println!("Tenant: {}  Range: {}", session.tenant(), label);
        for summary in &summaries {
            print_summary(summary, &session);
        }
    }

    session.close().await;
    Ok(())
}

fn load_store(config: &Config) -> anyhow::Result<MemoryStore> {
    let path = &config.store.seed_file;
    if !path.exists() {
        log::warn!("Seed file {} not found; starting empty", path.display());
        return Ok(MemoryStore::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let data: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    log::info!("Seeded store from {}", path.display());
    Ok(MemoryStore::with_data(data))
}

/// Pick the reporting window: explicit bounds, then drill-down, then quick range
fn select_filter(args: &Args, session: &Session) -> anyhow::Result<(String, DateFilter)> {
    if args.from.is_some() || args.to.is_some() {
        let filter = DateFilter::parse(args.from.as_deref(), args.to.as_deref())
            .with_offset(session.calendar().offset());
        let label = format!(
            "{} to {}",
            args.from.as_deref().unwrap_or("start"),
            args.to.as_deref().unwrap_or("end")
        );
        return Ok((label, filter));
    }

    let today = session.calendar().now().date();
    if let Some(year) = args.year {
        if !session.recent_years().contains(&year) {
            log::warn!("Year {} is outside the recent-years window", year);
        }
    }
    let drill_down: Option<DateRange> = match (args.year, args.month, args.week) {
        (year, Some(month), Some(week)) => {
            let reference = time::month_of(year.unwrap_or(today.year()), month)
                .context("Invalid month")?
                .from
                .date();
            Some(
                time::week_of_month(reference, week.saturating_sub(1)).with_context(|| {
                    format!("Week must be between 1 and {}", time::weeks_in_month(reference))
                })?,
            )
        }
        (year, Some(month), None) => Some(
            time::month_of(year.unwrap_or(today.year()), month)
                .context("Month must be between 1 and 12")?,
        ),
        (Some(year), None, _) => Some(time::year_of(year).context("Invalid year")?),
        (None, None, _) => None,
    };

    let range = match drill_down {
        Some(range) => Some(range),
        None => match args.range {
            Some(quick) => session.range(quick),
            None => session.default_range(),
        },
    };

    let label = range
        .as_ref()
        .map(DateRange::description)
        .unwrap_or_else(|| "All Time".to_string());
    Ok((label, session.filter(range.as_ref())))
}

fn print_summary(summary: &EntityTypeSummary, session: &Session) {
    let currency = &session.config().currency;
    println!();
    println!("== {} ==", summary.entity_type);
    for instance in &summary.instances {
        println!(
            "  {:<28} total {:>16}  paid {:>16}  outstanding {:>16}  net {:>16}",
            instance.name,
            format_amount(instance.totals.total, currency),
            format_amount(instance.totals.paid, currency),
            format_amount(instance.totals.outstanding, currency),
            format_amount(instance.totals.net_balance, currency),
        );
        if instance.advance_count > 0 {
            println!("  {:<28} {} entr(ies) paid in advance", "", instance.advance_count);
        }
        if !instance.totals.unlinked.is_zero() {
            println!(
                "  {:<28} unlinked payments {}",
                "",
                format_amount(instance.totals.unlinked, currency)
            );
        }
    }
    println!(
        "  {:<28} total {:>16}  paid {:>16}  outstanding {:>16}  net {:>16}",
        "TOTAL",
        format_amount(summary.totals.total, currency),
        format_amount(summary.totals.paid, currency),
        format_amount(summary.totals.outstanding, currency),
        format_amount(summary.totals.net_balance, currency),
    );
}
