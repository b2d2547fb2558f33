//! Glimpse simulator
//!
//! Drives one lineage against an in-process sampler with configurable
//! latency and a scripted failure sequence. Prints one JSON object per
//! event on stdout; logs go to stderr.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{value_parser, Arg, ArgAction, Command};
use glimpse_core::prelude::*;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Sampler with fixed latency that fails with scripted status codes first
#[derive(Debug)]
struct SimSampler {
    latency: Duration,
    failures: Mutex<VecDeque<u16>>,
}

#[async_trait]
impl Sampler for SimSampler {
    async fn sample(
        &self,
        request: &SampleRequest,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        tokio::select! {
            () = cancel.cancelled() => return Err(BackendError::Transport("cancelled".into())),
            () = tokio::time::sleep(self.latency) => {}
        }
        if let Some(code) = self.failures.lock().pop_front() {
            return Err(BackendError::status(code, "simulated failure"));
        }
        let directives: Vec<String> = request
            .constraints
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        Ok(format!(
            "{} ({}) [{}]",
            request.input_text,
            if request.goal.is_empty() { "no goal" } else { request.goal.as_str() },
            directives.join("; ")
        ))
    }
}

fn cli() -> Command {
    Command::new("glimpse-sim")
        .version(glimpse_core::VERSION)
        .about("Preview a draft against a simulated backend, then optionally commit")
        .arg(
            Arg::new("text")
                .long("text")
                .default_value("Tell customers about the new feature")
                .help("Draft input text"),
        )
        .arg(Arg::new("goal").long("goal").default_value("announce").help("Draft goal"))
        .arg(
            Arg::new("constraints")
                .long("constraints")
                .default_value("tone:professional")
                .help("Constraints as key:value pairs separated by commas"),
        )
        .arg(
            Arg::new("latency-ms")
                .long("latency-ms")
                .default_value("200")
                .value_parser(value_parser!(u64))
                .help("Simulated sampler latency per call"),
        )
        .arg(
            Arg::new("fail")
                .long("fail")
                .value_delimiter(',')
                .value_parser(value_parser!(u16))
                .help("Status codes returned by the first sampler calls, e.g. 429,429,503"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("essence-only")
                .long("essence-only")
                .action(ArgAction::SetTrue)
                .help("Withhold samples and show only the essence"),
        )
        .arg(
            Arg::new("accept-defaults")
                .long("accept-defaults")
                .action(ArgAction::SetTrue)
                .help("Answer clarifiers with their defaults before a second attempt"),
        )
        .arg(
            Arg::new("commit")
                .long("commit")
                .action(ArgAction::SetTrue)
                .help("Commit the draft if a preview was aligned"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON on stderr"),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("json-logs"));

    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => GlimpseConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GlimpseConfig::default(),
    };

    let latency = matches.get_one::<u64>("latency-ms").copied().unwrap_or(200);
    let failures: VecDeque<u16> = matches
        .get_many::<u16>("fail")
        .map(|codes| codes.copied().collect())
        .unwrap_or_default();
    let sampler = Arc::new(SimSampler {
        latency: Duration::from_millis(latency),
        failures: Mutex::new(failures),
    });

    let engine = GlimpseEngine::new(sampler, config)?;
    engine.set_essence_only(matches.get_flag("essence-only"));
    let lineage = engine.lineage();

    let text = matches.get_one::<String>("text").map_or("", String::as_str);
    let goal = matches.get_one::<String>("goal").map_or("", String::as_str);
    let constraints: Constraints = matches
        .get_one::<String>("constraints")
        .map_or("", String::as_str)
        .parse()?;
    let mut draft = Draft::new(text).with_goal(goal).with_constraints(constraints);

    let mut result = lineage.preview(&draft).await?;
    println!("{}", serde_json::to_string(&result)?);

    if !result.is_aligned() && matches.get_flag("accept-defaults") {
        for clarifier in &result.clarifiers {
            let (key, value) = clarifier.default_constraint();
            draft = draft.with_constraint(key, value);
        }
        result = lineage.preview(&draft).await?;
        println!("{}", serde_json::to_string(&result)?);
    }

    if matches.get_flag("commit") {
        let committed = lineage
            .commit(&draft, |draft| async move {
                println!("{}", json!({ "event": "commit", "draft": draft }));
                Ok::<(), std::io::Error>(())
            })
            .await;
        if let Err(error) = committed {
            println!("{}", json!({ "event": "commit_refused", "reason": error.to_string() }));
        }
    }

    let stats = engine.cache().stats();
    println!(
        "{}",
        json!({
            "event": "summary",
            "lineage": lineage.id().to_string(),
            "status_history": lineage.status_history(),
            "attempt_metrics": lineage.attempt_metrics(),
            "cache": {
                "hits": stats.hits,
                "misses": stats.misses,
                "entries": stats.entry_count,
                "hit_rate": stats.hit_rate,
            },
        })
    );
    Ok(())
}
