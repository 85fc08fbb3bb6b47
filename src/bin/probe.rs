use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::Parser;
use crm_report::adapters::http::DEFAULT_BASE_URL;
use crm_report::core::date_range::{first_of_month, first_of_next_month, months_before, parse_month};
use crm_report::domain::model::{AggregationMode, CrmObject, Filter, QuerySpec};
use crm_report::domain::ports::SearchBackend;
use crm_report::utils::logger;
use crm_report::{generate_month_ranges, HubSpotSearchClient, SearchClientConfig};

/// Runs a single search for one month and prints the result.
#[derive(Debug, Parser)]
#[command(name = "crm-probe")]
struct Args {
    #[arg(long, env = "HUBSPOT_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,

    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, default_value = "deals")]
    object: String,

    #[arg(long, help = "Date property bounding the month (object default when omitted)")]
    date_property: Option<String>,

    #[arg(long, help = "Month to query, YYYY-MM (defaults to last month)")]
    month: Option<String>,

    #[arg(long = "filter", help = "property:OPERATOR[:value], repeatable")]
    filters: Vec<String>,

    #[arg(long, help = "Sum this property instead of counting")]
    sum: Option<String>,

    #[arg(long)]
    utc: bool,

    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    let object: CrmObject = args.object.parse()?;
    let filters = args
        .filters
        .iter()
        .map(|raw| raw.parse::<Filter>())
        .collect::<Result<Vec<_>, _>>()
        .context("invalid --filter")?;

    let today = Local::now().date_naive();
    let start = match &args.month {
        Some(raw) => parse_month(raw).with_context(|| format!("invalid --month '{}'", raw))?,
        None => months_before(first_of_month(today), 1).context("cannot compute last month")?,
    };
    let end = first_of_next_month(start).context("month out of range")?;

    let months = if args.utc {
        generate_month_ranges(start, end, &Utc)
    } else {
        generate_month_ranges(start, end, &Local)
    };
    let Some(month) = months.into_iter().next() else {
        bail!("empty month window");
    };

    let query = QuerySpec {
        object,
        date_property: args
            .date_property
            .clone()
            .unwrap_or_else(|| object.default_date_property().to_string()),
        time_range: month.range,
        filters,
        mode: match &args.sum {
            Some(property) => AggregationMode::Sum(property.clone()),
            None => AggregationMode::Count,
        },
    };

    println!("🔎 {} search for {}", object, month.label);
    for filter in query.filter_group().filters {
        println!("  - {:?}", filter);
    }

    let client = HubSpotSearchClient::new(SearchClientConfig::new(&args.base_url, &args.access_token))?;
    match client.search(&query).await {
        Ok(value) => println!("✅ Result: {}", value),
        Err(e) => {
            println!("❌ Search failed: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
