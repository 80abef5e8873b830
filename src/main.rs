//! fundbot CLI - verb-first dispatcher over the advisor core.
//!
//! Every verb is read-only or idempotent against the store except
//! `record-trade`.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fundbot::advisor::{Advisor, AdvisoryReport};
use fundbot::agent::llm::{HttpBackend, LlmBackend, LlmGateway, ModelRole};
use fundbot::agent::reflection::run_reflection_cycle;
use fundbot::analysis::learner;
use fundbot::analysis::regime::{detect_category_regime, DEFAULT_INDEX};
use fundbot::analysis::scorer;
use fundbot::config::Config;
use fundbot::models::FundCategory;
use fundbot::risk::allocation::check_compliance;
use fundbot::risk::stops::dynamic_stop_loss;
use fundbot::store::account::TradeInsert;
use fundbot::store::Database;
use fundbot::strategy::{monte_carlo, walk_forward};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "fundbot", about = "Quantitative fund-trading advisor", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Market analysis: index snapshot, regimes, fund scores
    Analyze,
    /// Generate today's advisory report
    Recommend,
    /// Full daily routine: learn, reflect, analyze, recommend, snapshot
    Daily,
    /// Run due reflections and show recent ones
    Reflect,
    /// Show the active knowledge base
    Knowledge,
    /// Show the learning report (validation stats, weights)
    Learn,
    /// Walk-forward validation of the trend strategy
    WalkForward,
    /// Monte-Carlo shuffle of backtest trades
    MonteCarlo {
        /// RNG seed for reproducible runs
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Show the LLM configuration, optionally switching provider
    Llm { provider: Option<String> },
    /// Record an executed trade
    RecordTrade {
        #[arg(long)]
        fund: String,
        #[arg(long, value_parser = ["buy", "sell"])]
        action: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        nav: f64,
        #[arg(long)]
        date: Option<String>,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Show current holdings and P&L
    Portfolio,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;
    let today = Local::now().date_naive();

    match cli.command {
        Command::Analyze => cmd_analyze(&db, &config)?,
        Command::Recommend => {
            let advisor = Advisor::new(db, config)?;
            let report = advisor.generate(today).await?;
            print_report(&report);
        }
        Command::Daily => cmd_daily(db, config, today).await?,
        Command::Reflect => cmd_reflect(&db, &config, today).await?,
        Command::Knowledge => cmd_knowledge(&db)?,
        Command::Learn => cmd_learn(&db)?,
        Command::WalkForward => cmd_walk_forward(&db)?,
        Command::MonteCarlo { seed } => cmd_monte_carlo(&db, seed)?,
        Command::Llm { provider } => cmd_llm(&config, provider)?,
        Command::RecordTrade {
            fund,
            action,
            amount,
            nav,
            date,
            note,
        } => cmd_record_trade(&db, &fund, &action, amount, nav, date, &note, today)?,
        Command::Portfolio => cmd_portfolio(&db, &config)?,
    }

    Ok(())
}

fn cmd_analyze(db: &Database, config: &Config) -> Result<()> {
    let indices: Vec<(String, String)> = config
        .benchmark_indices
        .iter()
        .map(|i| (i.code.clone(), i.name.clone()))
        .collect();
    let snapshot = db.latest_index_snapshot(&indices)?;
    if snapshot.is_empty() {
        println!("no index data in the store; run your data updater first");
    } else {
        println!("== market indices ==");
        for s in snapshot {
            let change = s
                .change_pct
                .map(|c| format!("{c:+.2}%"))
                .unwrap_or_else(|| "-".to_string());
            println!("  {:16} {:>10.2}  {:>8}  {}", s.name, s.close, change, s.trade_date);
        }
    }

    println!("\n== regimes ==");
    for category in FundCategory::ALL {
        match detect_category_regime(db, category) {
            Some(reading) => println!(
                "  {:8} {:12} trend {:+6.1}  vol {:.2}",
                category.as_str(),
                reading.regime.as_str(),
                reading.trend_score,
                reading.volatility
            ),
            None => println!("  {:8} insufficient history", category.as_str()),
        }
    }

    let scored = scorer::screen_and_score(db, config)?;
    if !scored.is_empty() {
        println!("\n== fund scores (top 10) ==");
        for (i, f) in scored.iter().take(10).enumerate() {
            println!(
                "  {:>2}. {} {:24} {:>5.1}  1m {:>7} 3m {:>7} dd {:>7.2}%",
                i + 1,
                f.fund_code,
                f.fund_name.chars().take(24).collect::<String>(),
                f.total_score,
                f.return_1m.map(|r| format!("{r:+.2}%")).unwrap_or_else(|| "-".into()),
                f.return_3m.map(|r| format!("{r:+.2}%")).unwrap_or_else(|| "-".into()),
                f.max_drawdown,
            );
        }
    }
    Ok(())
}

async fn cmd_daily(db: Database, config: Config, today: chrono::NaiveDate) -> Result<()> {
    println!("== daily routine ==\n");

    // Seed the watch pool from the configured universe; existing entries
    // are left untouched.
    let today_str = today.format("%Y-%m-%d").to_string();
    let watched: std::collections::BTreeSet<String> = db
        .watchlist()?
        .into_iter()
        .map(|w| w.fund_code)
        .collect();
    for (category, funds) in &config.fund_universe {
        let Some(category) = FundCategory::parse(category) else {
            continue;
        };
        for fund in funds {
            if watched.contains(&fund.code) {
                continue;
            }
            if let Err(e) = db.add_to_watchlist(&fund.code, category, &today_str, "seed universe") {
                warn!("watchlist seed {}: {}", fund.code, e);
            } else {
                let _ = db.upsert_fund_info(&fund.code, &fund.name, None);
            }
        }
    }

    println!("[1/6] learning cycle");
    if let Err(e) = learner::run_learning_cycle(&db, today) {
        warn!("learning cycle: {}", e);
    }

    println!("[2/6] reflection cycle");
    let backend = HttpBackend::new();
    if backend.has_credentials("gemini") || backend.has_credentials("anthropic") {
        let gateway = LlmGateway::new(config.llm.clone(), Arc::new(backend));
        if let Err(e) = run_reflection_cycle(&db, &gateway, &config, today).await {
            warn!("reflection cycle: {}", e);
        }
    } else {
        println!("  skipped (no LLM credentials)");
    }

    println!("[3/6] market analysis");
    if let Err(e) = cmd_analyze(&db, &config) {
        warn!("analysis: {}", e);
    }

    println!("\n[4/6] allocation compliance");
    match detect_category_regime(&db, FundCategory::Equity) {
        Some(reading) => {
            let pe_pct = db
                .cached_valuation()?
                .map(|(v, _)| v.pe_percentile)
                .unwrap_or(50.0);
            let report = check_compliance(&db, reading.regime, pe_pct, config.current_cash)?;
            if report.compliant {
                println!("  allocation within limits");
            } else {
                for v in &report.violations {
                    println!("  violation: {v}");
                }
                for s in &report.suggestions {
                    println!("  suggestion: {s}");
                }
            }
        }
        None => println!("  skipped (no index history for {})", DEFAULT_INDEX),
    }

    println!("\n[5/6] advisory report");
    let advisor = Advisor::new(db, config)?;
    let report = advisor.generate(today).await?;
    print_report(&report);

    println!("\n[6/6] done - account snapshot written");
    Ok(())
}

async fn cmd_reflect(db: &Database, config: &Config, today: chrono::NaiveDate) -> Result<()> {
    let backend = HttpBackend::new();
    if backend.has_credentials("gemini") || backend.has_credentials("anthropic") {
        let gateway = LlmGateway::new(config.llm.clone(), Arc::new(backend));
        let (completed, tokens) = run_reflection_cycle(db, &gateway, config, today).await?;
        println!("completed {completed} reflections ({tokens} tokens)");
    } else {
        println!("no LLM credentials; showing stored reflections only");
    }

    let reflections = db.recent_reflections(10)?;
    if reflections.is_empty() {
        println!("no reflections yet - they trigger 7/30 days after each decision");
        return Ok(());
    }
    println!("\n== recent reflections ==");
    for r in reflections {
        let mark = if r.was_correct { "correct" } else { "wrong" };
        println!(
            "  [{}] decided {} -> reviewed {} ({})",
            r.period,
            r.decision_date.unwrap_or_else(|| "?".into()),
            r.reflection_date,
            mark
        );
        if !r.reflection_text.is_empty() {
            println!("    {}", r.reflection_text.chars().take(160).collect::<String>());
        }
    }
    Ok(())
}

fn cmd_knowledge(db: &Database) -> Result<()> {
    let entries = db.active_knowledge()?;
    if entries.is_empty() {
        println!("knowledge base is empty - lessons accumulate from reflections");
        return Ok(());
    }
    println!("== knowledge base ({} lessons) ==", entries.len());
    for e in entries {
        println!(
            "  [{:16}] x{:<3} {}  ({})",
            e.category,
            e.times_validated,
            e.content.chars().take(90).collect::<String>(),
            e.created_at.chars().take(10).collect::<String>()
        );
    }
    Ok(())
}

fn cmd_learn(db: &Database) -> Result<()> {
    let known = [
        "trend_following",
        "mean_reversion",
        "momentum",
        "valuation",
        "macro_cycle",
        "manager_alpha",
    ];
    let report = learner::learning_report(db, &known)?;
    println!(
        "signals: {} total, {} validated, {} pending",
        report.total_signals,
        report.validated_signals,
        report.total_signals - report.validated_signals
    );

    if report.performance.is_empty() {
        println!("no strategy performance yet (needs >= 5 validated signals)");
    } else {
        println!("\n== strategy performance by regime ==");
        for p in &report.performance {
            println!(
                "  {:16} {:12} n={:<4} win {:>5.1}%  ret {:>+6.2}%  weight {:.2}  calib {:+.2}",
                p.strategy_name,
                p.regime,
                p.total_signals,
                p.win_rate * 100.0,
                p.avg_return,
                p.recommended_weight,
                p.confidence_accuracy
            );
        }
    }

    for (regime, weights) in &report.learned {
        let rendered: Vec<String> = weights.iter().map(|(k, v)| format!("{k}={v:.3}")).collect();
        println!("\n  [{regime}] learned weights: {}", rendered.join(", "));
    }
    Ok(())
}

fn cmd_walk_forward(db: &Database) -> Result<()> {
    let book = db.build_fund_book()?;
    if book.is_empty() {
        println!("no fund data");
        return Ok(());
    }
    let result = walk_forward::run_walk_forward(&book, 6);
    println!("== walk-forward ({} windows) ==", result.n_windows);
    println!("  avg return  {:+.2}%", result.avg_return_pct);
    println!("  worst       {:+.2}%", result.worst_return_pct);
    println!("  best        {:+.2}%", result.best_return_pct);
    println!("  win rate    {:.1}%", result.win_rate_pct);
    println!("  trades      {}", result.total_trades);
    println!("  robustness  {:.0}/100", result.robustness_score);
    for w in result.windows.iter().take(20) {
        println!(
            "    {} w{} {:9} {:>7.2}% {}",
            w.fund_code,
            w.window,
            w.predicted,
            w.actual_return_pct,
            if w.is_correct { "ok" } else { "x" }
        );
    }
    Ok(())
}

fn cmd_monte_carlo(db: &Database, seed: u64) -> Result<()> {
    let book = db.build_fund_book()?;
    if book.is_empty() {
        println!("no fund data");
        return Ok(());
    }
    let Some(result) = monte_carlo::run_from_backtest(&book, seed) else {
        println!("not enough closed trades (< 3) for a simulation");
        return Ok(());
    };
    println!("== monte carlo ({} shuffles of {} trades) ==", result.n_simulations, result.n_trades);
    println!("  median return     {:+.2}%", result.median_return_pct);
    println!("  mean return       {:+.2}%", result.mean_return_pct);
    println!("  5% / 95%          {:+.2}% / {:+.2}%", result.percentile_5_pct, result.percentile_95_pct);
    println!("  worst / best      {:+.2}% / {:+.2}%", result.worst_return_pct, result.best_return_pct);
    println!("  median max dd     {:.2}%", result.median_max_drawdown_pct);
    println!("  P(profit)         {:.1}%", result.probability_of_profit_pct);
    println!("  robustness        {:.0}/100", result.robustness_score);
    if result.probability_of_profit_pct >= 70.0 {
        println!("  verdict: robust - profitable under most orderings");
    } else if result.probability_of_profit_pct >= 50.0 {
        println!("  verdict: mixed - some dependence on trade sequencing");
    } else {
        println!("  verdict: fragile - results hinge on lucky ordering");
    }
    Ok(())
}

fn cmd_llm(config: &Config, provider: Option<String>) -> Result<()> {
    if let Some(new_provider) = provider {
        if !matches!(new_provider.as_str(), "gemini" | "anthropic") {
            anyhow::bail!("unknown provider '{new_provider}' (use gemini or anthropic)");
        }
        persist_provider_to_env(&new_provider)?;
        std::env::set_var("LLM_PROVIDER", &new_provider);
        println!("switched provider to {new_provider}");
    }

    let backend = HttpBackend::new();
    let gateway = LlmGateway::new(config.llm.clone(), Arc::new(backend));
    let provider = gateway.provider();
    println!("== LLM configuration ==");
    println!("  provider       {provider}");
    println!("  analysis model {}", gateway.model_for(&provider, ModelRole::Analysis));
    println!("  decision model {}", gateway.model_for(&provider, ModelRole::Decision));
    println!("  critical model {}", gateway.model_for(&provider, ModelRole::Critical));
    println!("  max retries    {}", config.llm.max_retries);
    println!("  fallback       {}", config.llm.enable_provider_fallback);
    Ok(())
}

fn persist_provider_to_env(provider: &str) -> Result<()> {
    let path = Path::new(".env");
    let mut lines: Vec<String> = if path.exists() {
        std::fs::read_to_string(path)
            .context("read .env")?
            .lines()
            .map(str::to_string)
            .collect()
    } else {
        Vec::new()
    };

    let mut found = false;
    for line in &mut lines {
        if line.trim_start().starts_with("LLM_PROVIDER=") {
            *line = format!("LLM_PROVIDER={provider}");
            found = true;
        }
    }
    if !found {
        lines.push(format!("LLM_PROVIDER={provider}"));
    }
    std::fs::write(path, lines.join("\n") + "\n").context("write .env")?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_record_trade(
    db: &Database,
    fund: &str,
    action: &str,
    amount: f64,
    nav: f64,
    date: Option<String>,
    note: &str,
    today: chrono::NaiveDate,
) -> Result<()> {
    anyhow::ensure!(amount > 0.0, "amount must be positive");
    anyhow::ensure!(nav > 0.0, "nav must be positive");
    let trade_date = date.unwrap_or_else(|| today.format("%Y-%m-%d").to_string());
    let shares = amount / nav;

    db.insert_trade(&TradeInsert {
        trade_date: &trade_date,
        fund_code: fund,
        action,
        amount,
        nav,
        shares: Some(shares),
        reason: note,
        confidence: None,
        status: "executed",
    })?;

    if action == "buy" {
        db.open_position(fund, shares, nav, &trade_date)?;
    }

    println!("recorded: {action} {fund} {amount:.2} RMB @ {nav:.4} ({shares:.2} shares)");
    Ok(())
}

fn cmd_portfolio(db: &Database, config: &Config) -> Result<()> {
    let holdings = db.holdings()?;
    let cash = db.latest_cash()?.unwrap_or(config.current_cash);
    if holdings.is_empty() {
        println!("no open positions; cash {cash:.2} RMB");
        return Ok(());
    }

    println!("== holdings ==");
    let mut invested = 0.0;
    let mut current = 0.0;
    for h in &holdings {
        let nav = h.current_nav.unwrap_or(h.cost_price);
        let pl_pct = if h.cost_price > 0.0 {
            (nav - h.cost_price) / h.cost_price * 100.0
        } else {
            0.0
        };
        invested += h.cost_price * h.shares;
        current += nav * h.shares;
        let name = db.fund_name(&h.fund_code).unwrap_or_default();

        // Volatility-scaled stop for each open position.
        let navs: Vec<f64> = db
            .fund_nav_history(&h.fund_code)?
            .iter()
            .map(|r| r.nav)
            .collect();
        let stop = dynamic_stop_loss(&navs, h.cost_price, config.single_fund_stop_loss);

        println!(
            "  {} {:20} {:>10.2} sh  cost {:.4}  nav {:.4}  {:+.2}%  stop {:.4} ({:.1}%)  since {}",
            h.fund_code,
            name.chars().take(20).collect::<String>(),
            h.shares,
            h.cost_price,
            nav,
            pl_pct,
            stop.stop_price,
            stop.stop_pct,
            h.buy_date
        );
        if nav <= stop.stop_price {
            println!("        stop breached - consider exiting");
        }
    }
    println!("\n  invested {invested:.2}  market {current:.2}  pnl {:+.2}  cash {cash:.2}", current - invested);
    Ok(())
}

fn print_report(report: &AdvisoryReport) {
    let mode = match report.mode {
        fundbot::advisor::AdvisoryMode::LlmEnhanced => "LLM-enhanced",
        fundbot::advisor::AdvisoryMode::QuantOnly => "quantitative-only",
    };
    println!(
        "\n== advisory {} ({}, {mode}) ==",
        report.date,
        report.regime.as_str()
    );
    println!(
        "account: total {:.2}  cash {:.2}  invested {:.2}  drawdown {:.2}%",
        report.account.total_value,
        report.account.cash,
        report.account.invested,
        report.account.drawdown * 100.0
    );

    for advice in &report.advices {
        let cost = advice
            .round_trip_cost
            .as_ref()
            .map(|c| format!("  fees ~{:.2}", c.total_fee))
            .unwrap_or_default();
        println!(
            "  {:5} {} {:20} {:>10.2} RMB  conf {:.0}%{}",
            advice.action.label(),
            advice.fund_code,
            advice.fund_name.chars().take(20).collect::<String>(),
            advice.amount,
            advice.confidence * 100.0,
            cost
        );
        let first_line = advice.reason.lines().next().unwrap_or("");
        if !first_line.is_empty() {
            println!("        {}", first_line.chars().take(110).collect::<String>());
        }
    }

    if let Some(llm) = &report.llm {
        println!("\n  sentiment: {}  ({} tokens)", llm.sentiment, llm.tokens_used);
        if !llm.final_conclusion.is_empty() {
            println!("  conclusion: {}", llm.final_conclusion.chars().take(200).collect::<String>());
        }
        if !llm.portfolio_advice.is_empty() {
            println!("  portfolio: {}", llm.portfolio_advice.chars().take(200).collect::<String>());
        }
    }

    if !report.notices.is_empty() {
        println!("\n  notices:");
        for n in &report.notices {
            println!("  - {n}");
        }
    }
}
