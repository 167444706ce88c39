use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use finviz::endpoints::{DEFAULT_LAST_RATINGS, get_all_news, get_analyst_price_targets};
use finviz::enrich::{ChartOptions, ChartPeriod, ChartType, DirectoryResolver};
use finviz::types::Table;
use finviz::{Screener, ScreenerBuilder};
use futures::{StreamExt, pin_mut};
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "finviz")]
#[command(about = "A finviz.com screener client", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChartKind {
    Candle,
    Line,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Period {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Subcommand)]
enum Commands {
    /// Enumerate every record matching a set of screener filters
    Screen {
        #[arg(
            short = 'f',
            long = "filter",
            value_delimiter = ',',
            help = "Filter tokens, e.g. exch_nasd,cap_large"
        )]
        filters: Vec<String>,

        #[arg(
            long,
            value_parser = parse_table,
            default_value = "overview",
            help = "Result table (overview, valuation, ownership, performance, custom, financial, technical)"
        )]
        table: Table,

        #[arg(long, help = "Sort order, e.g. -marketcap")]
        order: Option<String>,

        #[arg(long, help = "Screener signal, e.g. ta_topgainers")]
        signal: Option<String>,

        #[arg(long, value_delimiter = ',', help = "Restrict to these tickers")]
        tickers: Vec<String>,

        #[arg(
            long,
            help = "Start from a screener URL instead of filter flags",
            conflicts_with_all = ["filters", "table", "order", "signal", "tickers"]
        )]
        url: Option<String>,

        #[arg(
            long,
            help = "Maximum number of records to return",
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        limit: Option<u32>,

        #[arg(long, default_value_t = 0, help = "Delay between requests in milliseconds")]
        delay_ms: u64,

        #[arg(long, default_value_t = 30, help = "Per-request timeout in seconds")]
        timeout: u64,

        #[arg(long, help = "Fetch the quote page of every record")]
        details: bool,

        #[arg(long, value_name = "DIR", help = "Download the chart of every record into DIR")]
        charts_dir: Option<PathBuf>,

        #[arg(long, default_value_t = 8, help = "Concurrent chart downloads")]
        concurrency: usize,

        #[arg(long, value_enum, default_value = "candle", help = "Chart type")]
        chart_type: ChartKind,

        #[arg(long, value_enum, default_value = "daily", help = "Chart period")]
        chart_period: Period,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Show the most recent analyst ratings and price targets of a ticker
    Targets {
        #[arg(help = "Ticker symbol, e.g. AAPL")]
        ticker: String,

        #[arg(long, default_value_t = DEFAULT_LAST_RATINGS, help = "Number of ratings to show")]
        last: usize,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// List the headlines on the market news page
    News {
        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
}

fn parse_table(s: &str) -> Result<Table, String> {
    Table::from_str(s).map_err(|e| e.to_string())
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    match cli.command {
        Commands::Screen {
            filters,
            table,
            order,
            signal,
            tickers,
            url,
            limit,
            delay_ms,
            timeout,
            details,
            charts_dir,
            concurrency,
            chart_type,
            chart_period,
            format,
        } => {
            let mut builder = match url {
                Some(url) => Screener::builder().from_url(&url).unwrap_or_else(|e| {
                    log::error!("Invalid screener URL: {}", e);
                    process::exit(1);
                }),
                None => {
                    let mut builder: ScreenerBuilder =
                        Screener::builder().filters(filters).table(table).tickers(tickers);
                    if let Some(order) = order {
                        builder = builder.order(order);
                    }
                    if let Some(signal) = signal {
                        builder = builder.signal(signal);
                    }
                    builder
                }
            };
            if let Some(limit) = limit {
                builder = builder.limit(limit as usize);
            }

            let chart_options = ChartOptions {
                chart_type: match chart_type {
                    ChartKind::Candle => ChartType::Candle,
                    ChartKind::Line => ChartType::Line,
                },
                period: match chart_period {
                    Period::Daily => ChartPeriod::Daily,
                    Period::Weekly => ChartPeriod::Weekly,
                    Period::Monthly => ChartPeriod::Monthly,
                },
                ..Default::default()
            };

            let mut screener = builder
                .delay(Duration::from_millis(delay_ms))
                .timeout(Duration::from_secs(timeout))
                .chart_options(chart_options)
                .build()
                .unwrap_or_else(|e| {
                    log::error!("Error creating screener: {}", e);
                    process::exit(1);
                });

            let enrich = details || charts_dir.is_some();

            // Plain listing streams records as pages arrive.
            if !enrich && matches!(format, OutputFormat::Text) {
                let records = screener.records();
                pin_mut!(records);
                let mut shown = 0;
                while let Some(record) = records.next().await {
                    match record {
                        Ok(record) => {
                            println!("{}", record);
                            shown += 1;
                        }
                        Err(e) => {
                            log::error!("Error fetching screener results: {}", e);
                            process::exit(1);
                        }
                    }
                }
                if shown == 0 {
                    println!("No entries to display.");
                }
                return;
            }

            if details {
                let report = screener.ticker_details().await.unwrap_or_else(|e| {
                    log::error!("Error fetching screener results: {}", e);
                    process::exit(1);
                });
                if report.failed() > 0 {
                    log::warn!("{} detail fetch(es) failed", report.failed());
                }
            }

            if let Some(dir) = charts_dir {
                let resolver = DirectoryResolver::new(&dir);
                let report = screener
                    .charts(concurrency, &resolver)
                    .await
                    .unwrap_or_else(|e| {
                        log::error!("Error fetching screener results: {}", e);
                        process::exit(1);
                    });
                log::info!(
                    "Saved {} of {} chart(s) to {}",
                    report.succeeded(),
                    report.attempted,
                    dir.display()
                );
                for failure in &report.failures {
                    log::warn!("Chart not saved: {}", failure);
                }
            }

            let records = screener.collect().await.unwrap_or_else(|e| {
                log::error!("Error fetching screener results: {}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&records),
                OutputFormat::Text => {
                    if records.is_empty() {
                        println!("No entries to display.");
                    } else {
                        for record in &records {
                            println!("{}", record);
                        }
                    }
                }
            }
        }

        Commands::Targets {
            ticker,
            last,
            format,
        } => {
            log::info!("Fetching analyst ratings for {}...", ticker);

            let targets = get_analyst_price_targets(&ticker, last)
                .await
                .unwrap_or_else(|e| {
                    log::error!("Error fetching price targets: {}", e);
                    process::exit(1);
                });

            match format {
                OutputFormat::Json => serialize_json(&targets),
                OutputFormat::Text => {
                    if targets.is_empty() {
                        println!("No entries to display.");
                    } else {
                        for target in &targets {
                            println!("{}", target);
                        }
                    }
                }
            }
        }

        Commands::News { format } => {
            log::info!("Fetching market news...");

            let news = get_all_news().await.unwrap_or_else(|e| {
                log::error!("Error fetching news: {}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&news),
                OutputFormat::Text => {
                    if news.is_empty() {
                        println!("No entries to display.");
                    } else {
                        for item in &news {
                            println!("{}", item);
                            println!("       {}", item.url);
                        }
                    }
                }
            }
        }
    }
}
