use chrono::{Local, Utc};
use clap::Parser;
use crm_report::utils::{logger, validation::Validate};
use crm_report::{
    generate_month_ranges, CliConfig, HubSpotSearchClient, LocalStorage, ReportConfig,
    ReportEngine, ReportError,
};

#[tokio::main]
async fn main() {
    // .env 可有可無，token 也可以來自環境變數或 --access-token
    let dotenv = dotenvy::dotenv();
    let config = CliConfig::parse();

    // 初始化日誌
    if config.json_logs {
        logger::init_json_logger(config.verbose);
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting crm-report");
    if let Ok(path) = dotenv {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    if let Err(e) = run(config).await {
        tracing::error!("❌ Report failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());
        std::process::exit(e.exit_code());
    }
}

async fn run(config: CliConfig) -> Result<(), ReportError> {
    // 驗證配置
    config.validate()?;
    let token = config.require_token()?;

    let mut report = match &config.config {
        Some(path) => {
            tracing::info!("Using report definition {}", path);
            ReportConfig::from_file(path)?
        }
        None => ReportConfig::builtin()?,
    };
    if let Some(base_url) = &config.base_url {
        report.api.base_url = base_url.clone();
    }
    report.validate()?;

    let today = config.today_at(Utc::now());
    let (from, to) = config.report_window(today)?;
    let months = if config.utc {
        generate_month_ranges(from, to, &Utc)
    } else {
        generate_month_ranges(from, to, &Local)
    };

    if months.is_empty() {
        tracing::info!("No complete months between {} and {}", from, to);
        println!("Nothing to report between {} and {}", from, to);
        return Ok(());
    }

    let client = HubSpotSearchClient::new(report.client_config(token))?;
    let storage = LocalStorage::new(config.output_path.clone());
    let engine = ReportEngine::new(client, storage, report);

    let summary = engine.run(&months, today).await?;
    if let Some(path) = &summary.output_path {
        println!("✅ Report saved to: {}", path);
    }
    if summary.failed > 0 {
        println!(
            "⚠️ {} of {} queries failed and were left empty",
            summary.failed, summary.queried
        );
    }

    Ok(())
}
