use crate::api::{contact, hero};
use crate::api::models::{ContactReplyRequest, ContactStatus};
use crate::api::resources::{self, is_valid_email};
use crate::api::{ApiClient, ApiError, Resource, ResourceSpec};
use crate::audit::AuditLog;
use crate::config::Config;
use crate::session::monitor::{self, lock, with_monitor, Restore};
use crate::session::scheduler::SessionNotifier;
use crate::session::warning::ended_text;
use crate::session::{
    format_remaining, ActivityEvent, Check, LogoutReason, Scheduler, SessionError,
    SessionMonitor, SharedMonitor, WarningBanner,
};
use crate::{table, Args};
use anyhow::{anyhow, bail, Context as _, Result};
use chrono::{Local, TimeZone};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Context {
    pub args: Args,
    pub config: Config,
    pub api: ApiClient,
    pub monitor: SharedMonitor,
    pub scheduler: RefCell<Scheduler>,
    pub audit: Option<Arc<AuditLog>>,
    pub tab_id: String,
    pub history_path: Option<PathBuf>,
}

enum Flow {
    Continue,
    Exit,
}

/// Prints the expiry warning and forced-logout notices from the timer thread
struct TerminalNotifier {
    banner: WarningBanner,
}

impl SessionNotifier for TerminalNotifier {
    fn on_check(&mut self, check: &Check) {
        if let Some(text) = self.banner.update(check) {
            eprintln!("\n[session] {}", text);
        }
    }
}

pub fn run_once(ctx: &Context, line: &str) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    restore_session(ctx);
    enforce_expiry(ctx);
    record_activity(ctx, ActivityEvent::KeyPress);
    handle_line(ctx, &mut rl, line)?;
    Ok(())
}

pub fn run_repl(ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    if let Some(path) = &ctx.history_path {
        let _ = rl.load_history(path);
    }

    println!("nrgadmin - type help for commands, exit to quit");
    restore_session(&ctx);
    start_timer(&ctx);

    loop {
        match rl.readline(&prompt(&ctx)) {
            Ok(line) => {
                // Decide expiry before this input can count as activity
                enforce_expiry(&ctx);
                record_activity(&ctx, ActivityEvent::KeyPress);

                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                match handle_line(&ctx, &mut rl, line) {
                    Ok(Flow::Exit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => eprintln!("Error: {:#}", e),
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &ctx.history_path {
        if let Err(e) = rl.save_history(path) {
            tracing::debug!("failed to save history: {}", e);
        }
    }
    // The session stays in storage for the next run; only this console's timer stops
    ctx.scheduler.borrow_mut().cancel();
    Ok(())
}

fn prompt(ctx: &Context) -> String {
    match lock(&ctx.monitor).user() {
        Some(user) => format!("nrg ({})> ", user.email),
        None => "nrg> ".to_string(),
    }
}

fn restore_session(ctx: &Context) {
    let restored = with_monitor(&ctx.monitor, |m| m.restore());
    match restored {
        Restore::Restored(user) => println!("Welcome back, {} ({})", user.name, user.role),
        Restore::Expired => println!("{}", ended_text(LogoutReason::Expired)),
        Restore::Malformed(detail) => {
            tracing::debug!(%detail, "stored session discarded");
            println!("{}", ended_text(LogoutReason::MalformedState))
        }
        Restore::NoSession => {}
    }
}

fn start_timer(ctx: &Context) {
    let mut scheduler = ctx.scheduler.borrow_mut();
    scheduler.cancel();
    if lock(&ctx.monitor).is_authenticated() {
        *scheduler = Scheduler::start(
            ctx.monitor.clone(),
            Box::new(TerminalNotifier {
                banner: WarningBanner::new(),
            }),
        );
    }
}

/// Run an expiry check now, so a command typed after the session ran out
/// is refused even if the timer has not woken yet
fn enforce_expiry(ctx: &Context) {
    let check = with_monitor(&ctx.monitor, |m| m.check());
    if let Some(Check {
        ended: Some(reason),
        ..
    }) = check
    {
        println!("{}", ended_text(reason));
        ctx.scheduler.borrow_mut().cancel();
    }
}

fn record_activity(ctx: &Context, event: ActivityEvent) {
    with_monitor(&ctx.monitor, |m| m.record_activity(event));
}

fn handle_line(ctx: &Context, rl: &mut DefaultEditor, line: &str) -> Result<Flow> {
    let words = shell_words::split(line).context("could not parse command")?;
    let Some((cmd, rest)) = words.split_first() else {
        return Ok(Flow::Continue);
    };
    let rest: Vec<&str> = rest.iter().map(String::as_str).collect();

    match cmd.as_str() {
        "exit" | "quit" => return Ok(Flow::Exit),
        "help" => print_help(),
        "login" => cmd_login(ctx, rl, rest.first().copied())?,
        "logout" => cmd_logout(ctx),
        "extend" => cmd_extend(ctx)?,
        "session" => cmd_session(ctx),
        "whoami" => match lock(&ctx.monitor).user() {
            Some(user) => println!(
                "{} <{}> role={} phone={}",
                user.name,
                user.email,
                user.role,
                user.phone.as_deref().unwrap_or("-")
            ),
            None => println!("Not logged in."),
        },
        "dashboard" => cmd_dashboard(ctx)?,
        "contact" => {
            record_activity(ctx, ActivityEvent::Click);
            cmd_contact(ctx, rl, &rest)?
        }
        "hero" => {
            record_activity(ctx, ActivityEvent::Click);
            cmd_hero(ctx, &rest)?
        }
        name => match resources::find(name) {
            Some(spec) => {
                record_activity(ctx, ActivityEvent::Click);
                cmd_resource(ctx, rl, spec, &rest)?
            }
            None => println!("Unknown command: {} (try help)", name),
        },
    }
    Ok(Flow::Continue)
}

fn print_help() {
    println!("Session:");
    println!("  login [email]          - log in (prompts for password)");
    println!("  logout                 - log out now");
    println!("  extend                 - extend the session");
    println!("  session                - show session state and time left");
    println!("  whoami                 - show the logged-in user");
    println!("  dashboard              - summary counts");
    println!("Resources (news, shows, clients, videos, users, subscribers, subscriptions, mail-queue):");
    println!("  <res> list");
    println!("  <res> get <id>");
    println!("  <res> create field=value ...");
    println!("  <res> update <id> field=value ...");
    println!("  <res> delete <id>");
    println!("  mail-queue send <id>   - send a campaign to all subscribers");
    println!("  mail-logs list | stats");
    println!("Contact messages:");
    println!("  contact list [unread|read|replied|closed]");
    println!("  contact show <id>");
    println!("  contact status <id> <status>");
    println!("  contact reply <id> name=... email=... message=...");
    println!("  contact delete <id>");
    println!("Home page hero:");
    println!("  hero show");
    println!("  hero set main=<id> minor1=<id> minor2=<id>   (none clears a slot)");
    println!("  exit                   - quit");
}

fn cmd_login(ctx: &Context, rl: &mut DefaultEditor, email: Option<&str>) -> Result<()> {
    let email = match email {
        Some(e) => e.to_string(),
        None => rl.readline("Email: ")?.trim().to_string(),
    };
    if !is_valid_email(&email) {
        bail!("'{}' is not a valid email address", email);
    }
    let password = match &ctx.args.password {
        Some(p) => p.clone(),
        None => rl.readline("Password: ")?,
    };

    match monitor::login(&ctx.monitor, &email, &password) {
        Ok(user) => {
            println!("Logged in as {} ({})", user.name, user.role);
            start_timer(ctx);
            Ok(())
        }
        Err(e) => Err(anyhow!(e)),
    }
}

fn cmd_logout(ctx: &Context) {
    let was_authenticated = with_monitor(&ctx.monitor, |m| {
        let authenticated = m.is_authenticated();
        m.logout(LogoutReason::User);
        authenticated
    });
    ctx.scheduler.borrow_mut().cancel();
    if was_authenticated {
        println!("{}", ended_text(LogoutReason::User));
    } else {
        println!("Not logged in.");
    }
}

fn cmd_extend(ctx: &Context) -> Result<()> {
    let extended = with_monitor(&ctx.monitor, |m| {
        m.extend().map(|last| (last, m.policy().timeout))
    });
    let (last, timeout) = match extended {
        Ok(extended) => extended,
        Err(SessionError::Ended(reason)) => {
            ctx.scheduler.borrow_mut().cancel();
            println!("{}", ended_text(reason));
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    println!(
        "Session extended; expires in {} (at {})",
        format_remaining(timeout.as_millis() as i64),
        local_time(last + timeout.as_millis() as i64)
    );
    Ok(())
}

fn cmd_session(ctx: &Context) {
    with_monitor(&ctx.monitor, |monitor| print_session(ctx, monitor));
}

fn print_session(ctx: &Context, monitor: &mut SessionMonitor) {
    println!("Console: {}", ctx.tab_id);
    println!("API: {}", ctx.api.base_url());
    if let Some(audit) = &ctx.audit {
        println!("Audit log: {}", audit.path.display());
    }
    if monitor.is_degraded() {
        println!("Storage: unavailable (activity tracked in this console only)");
    }
    let Some(remaining) = monitor.remaining_ms() else {
        println!("State: signed out");
        return;
    };
    let state = monitor.state().map(|s| s.as_str()).unwrap_or("-");
    if let Some(user) = monitor.user() {
        println!("User: {} <{}>", user.name, user.email);
    }
    println!("State: {}", state);
    println!("Time left: {}", format_remaining(remaining));
    if let Some(last) = monitor.last_activity_ms() {
        println!("Last activity: {}", local_time(last));
    }
    let policy = monitor.policy();
    println!(
        "Timeout: {}s, warning at {}s, checks every {}s",
        policy.timeout.as_secs(),
        policy.warning.as_secs(),
        policy.poll_interval.as_secs()
    );
    if !ctx.scheduler.borrow().is_running() {
        println!("Expiry timer: not running in this console");
    }
}

fn cmd_dashboard(ctx: &Context) -> Result<()> {
    let token = require_token(ctx)?;
    let fast = ctx.api.with_timeout(ctx.config.api.fast_timeout());

    let count = |name: &str| -> String {
        resources::find(name)
            .and_then(|spec| Resource::new(&fast, spec, Some(token.as_str())).list().ok())
            .map(|items| items.len().to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    println!("Shows:        {}", count("shows"));
    println!("Subscribers:  {}", count("subscribers"));
    println!("News:         {}", count("news"));
    println!("Clients:      {}", count("clients"));

    match resources::mail_stats(&fast, Some(token.as_str())) {
        Ok(stats) => {
            println!("Emails:       {} total, {} sent, {} pending", stats.total_emails, stats.sent_emails, stats.pending_emails);
            println!("Mail reach:   {} subscribers", stats.total_subscribers);
        }
        Err(e) => {
            tracing::debug!("mail stats unavailable: {}", e);
            println!("Emails:       -");
        }
    }
    Ok(())
}

fn cmd_resource(
    ctx: &Context,
    rl: &mut DefaultEditor,
    spec: &'static ResourceSpec,
    args: &[&str],
) -> Result<()> {
    let token = require_token(ctx)?;
    let res = Resource::new(&ctx.api, spec, Some(token.as_str()));

    match args {
        [] | ["list"] => {
            let rows = api_call(ctx, res.list())?;
            println!("{}", table::render(spec.columns, &rows));
        }
        ["get", id] => {
            let record = api_call(ctx, res.get(parse_id(id)?))?;
            println!("{}", table::render_record(&record));
        }
        ["create", fields @ ..] => {
            let body = spec.build_body(&parse_pairs(fields)?, false)?;
            let result = res.create(&body);
            audit_mutation(ctx, "POST", spec.path, result.is_ok());
            let created = api_call(ctx, result)?;
            match created.get("id") {
                Some(id) => println!("Created {} {}", spec.name, id),
                None => println!("Created {}", spec.name),
            }
        }
        ["update", id, fields @ ..] => {
            let id = parse_id(id)?;
            let body = spec.build_body(&parse_pairs(fields)?, true)?;
            let result = res.update(id, &body);
            audit_mutation(ctx, "PUT", &spec.item_path(id), result.is_ok());
            api_call(ctx, result)?;
            println!("Updated {} {}", spec.name, id);
        }
        ["delete", id] => {
            let id = parse_id(id)?;
            if !confirm(ctx, rl, &format!("Delete {} {}?", spec.name, id))? {
                println!("Cancelled.");
                return Ok(());
            }
            let result = res.delete(id);
            audit_mutation(ctx, "DELETE", &spec.item_path(id), result.is_ok());
            api_call(ctx, result)?;
            println!("Deleted {} {}", spec.name, id);
        }
        ["send", id] if spec.name == "mail-queue" => {
            let id = parse_id(id)?;
            if !confirm(ctx, rl, &format!("Send mail {} to all subscribers?", id))? {
                println!("Cancelled.");
                return Ok(());
            }
            let result = resources::send_mail(&ctx.api, id, Some(token.as_str()));
            audit_mutation(ctx, "POST", &format!("{}/send", spec.item_path(id)), result.is_ok());
            api_call(ctx, result)?;
            println!("Mail {} queued for sending", id);
        }
        ["stats"] if spec.name == "mail-logs" => {
            let stats = api_call(ctx, resources::mail_stats(&ctx.api, Some(token.as_str())))?;
            println!("Total emails:      {}", stats.total_emails);
            println!("Sent:              {}", stats.sent_emails);
            println!("Pending:           {}", stats.pending_emails);
            println!("Total subscribers: {}", stats.total_subscribers);
        }
        _ => println!(
            "Usage: {} list | get <id> | create k=v ... | update <id> k=v ... | delete <id>",
            spec.name
        ),
    }
    Ok(())
}

fn cmd_contact(ctx: &Context, rl: &mut DefaultEditor, args: &[&str]) -> Result<()> {
    let token = require_token(ctx)?;
    let token = Some(token.as_str());

    match args {
        [] | ["list"] => {
            let rows = api_call(ctx, contact::list(&ctx.api, None, token))?;
            println!("{}", table::render(contact::COLUMNS, &rows));
        }
        ["list", status] => {
            let status = parse_status(status)?;
            let rows = api_call(ctx, contact::list(&ctx.api, Some(status), token))?;
            println!("{}", table::render(contact::COLUMNS, &rows));
        }
        ["show", id] => {
            let msg = api_call(ctx, contact::with_replies(&ctx.api, parse_id(id)?, token))?;
            println!("#{} [{}] {} <{}>", msg.id, msg.status.as_str(), msg.name, msg.email);
            if let Some(purpose) = &msg.purpose {
                println!("Purpose: {}", purpose);
            }
            println!("Subject: {}", msg.subject);
            println!("Received: {}", msg.created_at.as_deref().unwrap_or("-"));
            println!("\n{}\n", msg.message);
            for reply in &msg.replies {
                println!(
                    "--- reply by {} <{}> {}",
                    reply.admin_name,
                    reply.admin_email,
                    reply.created_at.as_deref().unwrap_or("")
                );
                println!("{}", reply.reply_message);
            }
        }
        ["status", id, status] => {
            let id = parse_id(id)?;
            let status = parse_status(status)?;
            let result = contact::set_status(&ctx.api, id, status, token);
            audit_mutation(ctx, "PUT", &format!("/api/contact/{}/status", id), result.is_ok());
            api_call(ctx, result)?;
            println!("Message {} marked {}", id, status.as_str());
        }
        ["reply", id, fields @ ..] => {
            let id = parse_id(id)?;
            let reply = build_reply(id, &parse_pairs(fields)?)?;
            let result = contact::reply(&ctx.api, &reply, token);
            audit_mutation(ctx, "POST", &format!("/api/contact/{}/replies", id), result.is_ok());
            api_call(ctx, result)?;
            println!("Reply sent to message {}", id);
        }
        ["delete", id] => {
            let id = parse_id(id)?;
            if !confirm(ctx, rl, &format!("Delete contact message {}?", id))? {
                println!("Cancelled.");
                return Ok(());
            }
            let result = contact::delete(&ctx.api, id, token);
            audit_mutation(ctx, "DELETE", &format!("/api/contact/{}", id), result.is_ok());
            api_call(ctx, result)?;
            println!("Deleted contact message {}", id);
        }
        _ => println!("Usage: contact list [status] | show <id> | status <id> <status> | reply <id> name=.. email=.. message=.. | delete <id>"),
    }
    Ok(())
}

fn cmd_hero(ctx: &Context, args: &[&str]) -> Result<()> {
    let token = require_token(ctx)?;
    let token = Some(token.as_str());

    match args {
        [] | ["show"] => {
            let selection = api_call(ctx, hero::get(&ctx.api, token))?;
            for (label, story) in [
                ("Main", &selection.main_story),
                ("Minor 1", &selection.minor_story_1),
                ("Minor 2", &selection.minor_story_2),
            ] {
                match story {
                    Some(s) => println!(
                        "{:8} #{} {} [{}] by {}",
                        label,
                        s.id,
                        s.title,
                        s.category.as_deref().unwrap_or("-"),
                        s.author.as_deref().unwrap_or("-")
                    ),
                    None => println!("{:8} (none selected)", label),
                }
            }
        }
        ["set", fields @ ..] => {
            let pairs = parse_pairs(fields)?;
            let current = api_call(ctx, hero::get(&ctx.api, token))?;
            let next = hero::apply_slots(current.ids(), &pairs)?;

            let news_spec = resources::find("news")
                .ok_or_else(|| anyhow!("news resource is not registered"))?;
            let news = api_call(ctx, Resource::new(&ctx.api, news_spec, token).list())?;
            let unknown = hero::unknown_stories(&next, &news);
            if !unknown.is_empty() {
                let ids: Vec<String> = unknown.iter().map(u64::to_string).collect();
                bail!("no news story with id {}", ids.join(", "));
            }

            let result = hero::set(&ctx.api, &next, token);
            audit_mutation(ctx, "PUT", hero::HERO_PATH, result.is_ok());
            api_call(ctx, result)?;
            println!("Hero selection saved");
        }
        _ => println!("Usage: hero show | hero set main=<id> minor1=<id> minor2=<id>"),
    }
    Ok(())
}

fn build_reply(id: u64, pairs: &[(String, String)]) -> Result<ContactReplyRequest> {
    let field = |name: &str| -> Result<String> {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("missing required field '{}'", name))
    };
    let admin_email = field("email")?;
    if !is_valid_email(&admin_email) {
        bail!("field 'email': not a valid email address");
    }
    Ok(ContactReplyRequest {
        contact_message_id: id,
        admin_name: field("name")?,
        admin_email,
        reply_message: field("message")?,
    })
}

fn require_token(ctx: &Context) -> Result<String> {
    lock(&ctx.monitor)
        .token()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Not logged in. Use 'login <email>'."))
}

/// Convert an API result, ending the session when the server rejects the credential
fn api_call<T>(ctx: &Context, result: Result<T, ApiError>) -> Result<T> {
    result.map_err(|e| {
        if let Some(reason) = monitor::end_on_unauthorized(&ctx.monitor, &e) {
            ctx.scheduler.borrow_mut().cancel();
            eprintln!("{}", ended_text(reason));
        }
        anyhow!(e)
    })
}

fn audit_mutation(ctx: &Context, method: &str, path: &str, ok: bool) {
    if let Some(audit) = &ctx.audit {
        if let Err(e) = audit.api_mutation(method, path, ok) {
            tracing::warn!("failed to write audit log: {}", e);
        }
    }
}

fn confirm(ctx: &Context, rl: &mut DefaultEditor, question: &str) -> Result<bool> {
    if ctx.args.yes {
        return Ok(true);
    }
    let answer = rl.readline(&format!("{} [y/N] ", question))?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn parse_id(s: &str) -> Result<u64> {
    s.parse::<u64>()
        .map_err(|_| anyhow!("invalid id '{}': expected a positive integer", s))
}

fn parse_status(s: &str) -> Result<ContactStatus> {
    ContactStatus::from_str(s)
        .ok_or_else(|| anyhow!("invalid status '{}'. Use: unread, read, replied, closed", s))
}

/// Split `name=value` arguments; values may contain `=`
fn parse_pairs(args: &[&str]) -> Result<Vec<(String, String)>> {
    args.iter()
        .map(|arg| {
            arg.split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow!("expected field=value, got '{}'", arg))
        })
        .collect()
}

fn local_time(ms: i64) -> String {
    match Local.timestamp_millis_opt(ms).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ms.to_string(),
    }
}
