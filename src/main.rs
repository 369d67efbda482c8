//! Terminal front end for InsightOps.
//! Run with: cargo run --bin insightops

use std::process::ExitCode;

use anyhow::{bail, Context};
use insightops_client::api::{DocumentQuery, ReportQuery};
use insightops_client::chat::{ChatMessage, Feedback, MessageRole, SendOutcome};
use insightops_client::session::oauth;
use insightops_client::session::{Route, SessionEvent};
use insightops_client::start::{self, App};
use insightops_client::ClientConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::TryRecvError;

const HELP: &str = "\
Commands:
  /login <email> <password>          sign in
  /register <name> <email> <password>
  /forgot <email>                    request a reset link
  /reset <token> <password> <confirm>
  /oauth <callback-url>              finish a Google sign-in
  /logout
  /history                           reload the last 20 minutes of chat
  /feedback <n> helpful|not_helpful  rate answer number n
  /status                            AI availability
  /docs                              first page of documents
  /decay                             dashboard summary and high-risk reports
  /quit
Anything else is sent as a question.";

fn main() -> ExitCode {
    start::init_tracing();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match rt.block_on(run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ClientConfig::from_env();
    tracing::info!("InsightOps client v{} -> {}", env!("CARGO_PKG_VERSION"), config.api_url);

    let app = App::connect(config).await.context("failed to start client")?;
    let mut events = app.session().subscribe();

    match app.session().landing_route() {
        Some(Route::Dashboard) => {
            if let Some(user) = app.session().user() {
                println!("Welcome back, {}.", user.name);
            }
            reload_history(&app).await;
        }
        _ => println!("Not signed in. Use /login or /register."),
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = handle(&app, line).await {
            println!("! {e}");
        }
        drain_events(&mut events);
    }
    Ok(())
}

async fn handle(app: &App, line: &str) -> anyhow::Result<()> {
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    match (command, args.as_slice()) {
        ("/login", [email, password]) => {
            app.auth.login(email, password).await?;
            println!("Signed in.");
            reload_history(app).await;
        }
        ("/register", [name, email, password]) => {
            app.auth.register(name, email, password).await?;
            println!("Account created. Check your inbox to verify your email, then /login.");
        }
        ("/forgot", [email]) => {
            app.auth.forgot_password(email).await?;
            println!("If an account exists for {email}, a reset link is on its way.");
        }
        ("/reset", [token, password, confirm]) => {
            app.auth.reset_password(token, password, confirm).await?;
            println!("Password updated. You can /login now.");
        }
        ("/oauth", [callback]) => {
            let url = url::Url::parse(callback).context("not a URL")?;
            match oauth::from_callback_url(&url) {
                Ok((payload, _clean)) => {
                    app.auth.complete_oauth(payload).await;
                    println!("Signed in with Google.");
                    reload_history(app).await;
                }
                Err(e) => println!("Sign-in failed ({}).", e.login_error_code()),
            }
        }
        ("/logout", []) => {
            app.auth.logout().await;
            println!("Signed out.");
        }
        ("/history", []) => reload_history(app).await,
        ("/feedback", [number, verdict]) => {
            let feedback: Feedback = verdict
                .parse()
                .map_err(|v| anyhow::anyhow!("unknown verdict {v}"))?;
            let index: usize = number.parse().context("message number expected")?;
            let messages = app.chat.messages();
            let Some(id) = index
                .checked_sub(1)
                .and_then(|i| messages.get(i))
                .and_then(|m| m.id.clone())
            else {
                bail!("message {index} cannot be rated");
            };
            app.chat.submit_feedback(&id, feedback).await?;
            println!("Thanks for the feedback.");
        }
        ("/status", []) => {
            let status = app.chat.api().status().await?;
            let mode = if status.ai_enabled { "AI answers" } else { "search only" };
            println!("{mode} via {}", status.provider);
        }
        ("/docs", []) => {
            let page = app
                .documents
                .list(&DocumentQuery {
                    workspace_id: Some(app.config.workspace_id.clone()),
                    ..DocumentQuery::default()
                })
                .await?;
            for doc in &page.documents {
                println!("  [{}] {} (v{}, {})", doc.kind, doc.title, doc.current_version, doc.id);
            }
            println!("{} of {} documents", page.documents.len(), page.total);
        }
        ("/decay", []) => {
            let stats = app.decay.summary().await?;
            println!(
                "{} documents, {} decaying (high {}, medium {}, low {}), {} pending review",
                stats.total_documents,
                stats.decay_detected,
                stats.by_risk_level.high,
                stats.by_risk_level.medium,
                stats.by_risk_level.low,
                stats.by_review_status.pending
            );
            let reports = app
                .decay
                .reports(&ReportQuery {
                    risk_level: Some(insightops_client::api::RiskLevel::High),
                    ..ReportQuery::default()
                })
                .await?;
            for report in &reports.reports {
                let title = report.document.as_ref().map_or(report.document_id.as_str(), |d| d.title.as_str());
                println!("  {title}: {:.0}% confidence", report.confidence_score * 100.0);
            }
        }
        (command, _) if command.starts_with('/') => println!("{HELP}"),
        _ => ask(app, line).await,
    }
    Ok(())
}

async fn ask(app: &App, question: &str) {
    let before = app.chat.messages().len();
    match app.chat.send_message(question).await {
        SendOutcome::Ignored => println!("(still waiting for the previous answer)"),
        SendOutcome::Answered | SendOutcome::Failed(_) => {
            for (index, message) in app.chat.messages().iter().enumerate().skip(before) {
                if message.role == MessageRole::Assistant {
                    print_message(index + 1, message);
                }
            }
        }
    }
}

async fn reload_history(app: &App) {
    match app.chat.refresh_history().await {
        Ok(true) => {
            for (index, message) in app.chat.messages().iter().enumerate() {
                print_message(index + 1, message);
            }
        }
        Ok(false) => {}
        Err(e) => tracing::warn!("Could not load chat history: {e}"),
    }
}

fn print_message(number: usize, message: &ChatMessage) {
    let who = match message.role {
        MessageRole::User => "you",
        MessageRole::Assistant => "insightops",
    };
    println!("{number:>3} {who}: {}", message.content);
    for source in &message.sources {
        let stale = if source.stale == Some(true) { " (stale)" } else { "" };
        println!("      source: {}{stale}", source.title);
    }
    for warning in &message.warnings {
        println!("      warning: {warning}");
    }
    if message.accepts_feedback() {
        println!("      /feedback {number} helpful|not_helpful");
    }
}

fn drain_events(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) {
    loop {
        match events.try_recv() {
            Ok(SessionEvent::ReauthenticationRequired) => {
                println!("Your session expired. Please /login again.");
            }
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}
