use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::sync::Arc;
use tracing::{error, info};

use trust_ledger::database::Database;
use trust_ledger::ledger::audit::{AuditAggregator, AuditReport};
use trust_ledger::ledger::record::LedgerRecord;
use trust_ledger::ledger::verify::detect_forks;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("verify-ledger")
        .version("1.0.0")
        .about("Verify the hash chains of a Trust's ledger records")
        .arg(
            Arg::new("database-url")
                .short('d')
                .long("database-url")
                .value_name("URL")
                .help("SQLite database URL")
                .default_value("sqlite://trust-ledger.db"),
        )
        .arg(
            Arg::new("trust-id")
                .short('t')
                .long("trust-id")
                .value_name("ID")
                .help("Trust whose chains to verify")
                .required(true),
        )
        .arg(
            Arg::new("currency")
                .short('c')
                .long("currency")
                .value_name("CODE")
                .help("Currency for the financial summary")
                .default_value("USD"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let database_url = matches
        .get_one::<String>("database-url")
        .ok_or_else(|| anyhow!("--database-url is required"))?;
    let trust_id = matches
        .get_one::<String>("trust-id")
        .ok_or_else(|| anyhow!("--trust-id is required"))?;
    let currency = matches
        .get_one::<String>("currency")
        .ok_or_else(|| anyhow!("--currency is required"))?;
    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    // Set log level based on flags
    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let report = match verify_trust(database_url, trust_id, currency).await {
        Ok(report) => report,
        Err(e) => {
            error!("Ledger verification failed: {}", e);
            std::process::exit(2);
        }
    };

    if !quiet {
        print_report(&report, verbose);
    }

    if !report.stats.chain_integrity {
        error!(
            "Chain integrity broken: {} anomalous record(s)",
            report.stats.anomalies.len()
        );
        std::process::exit(1);
    }

    if !quiet {
        println!("✓ Ledger verification completed successfully");
    }
    Ok(())
}

async fn verify_trust(database_url: &str, trust_id: &str, currency: &str) -> Result<AuditReport> {
    info!("Verifying ledger for trust {} in {}", trust_id, database_url);

    let database = Database::new(database_url).await?;
    let aggregator = AuditAggregator::new(Arc::new(database), currency);
    let report = aggregator.audit_report(trust_id).await?;

    let records: Vec<LedgerRecord> = report
        .audit_trail
        .iter()
        .rev()
        .map(|entry| entry.record.clone())
        .collect();
    for (first, second) in detect_forks(&records) {
        error!("Fork detected: records {} and {} share a predecessor", first, second);
    }

    Ok(report)
}

fn print_report(report: &AuditReport, verbose: bool) {
    let stats = &report.stats;
    println!("Trust {}", report.trust_id);
    println!(
        "  Records: {} ({} verified, {:.2}%)",
        stats.total_records, stats.verified_records, stats.verification_rate
    );
    println!(
        "  Chain integrity: {}",
        if stats.chain_integrity { "✓ valid" } else { "✗ broken" }
    );
    println!(
        "  By type: {} member joins, {} votes, {} contributions, {} loan approvals",
        stats.records_by_type.member_joins,
        stats.records_by_type.votes,
        stats.records_by_type.contributions,
        stats.records_by_type.loan_approvals
    );

    for anomaly in &stats.anomalies {
        println!("  ✗ {}", anomaly);
    }

    if verbose {
        let voting = &report.voting;
        println!(
            "\nVotes: {} ({} approve, {} reject, {:.2}% approval)",
            voting.total_votes, voting.approvals, voting.rejections, voting.approval_rate
        );

        let fin = &report.financial;
        println!(
            "Contributions: {} totalling {} {} (avg {})",
            fin.contribution_count, fin.total_contributed, fin.currency, fin.average_contribution
        );
        println!(
            "Loans: {} totalling {} {} (avg {})",
            fin.loan_count, fin.total_loaned, fin.currency, fin.average_loan
        );

        println!("\nAudit trail (newest first):");
        for entry in &report.audit_trail {
            println!(
                "  {} {}",
                if entry.verification.is_valid { "✓" } else { "✗" },
                entry.record.summary()
            );
        }
    }
}
