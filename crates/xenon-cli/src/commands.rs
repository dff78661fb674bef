//! Subcommand handlers. Each one builds a `SessionManager` from the config,
//! resolves the stored session and prints a human readable result.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::debug;

use xenon_core::api::AuditApi;
use xenon_core::auth::SessionManager;
use xenon_core::models::{AuditAction, AuditEntry, ChainVerdict, ListAuditParams, MenuSection, Permission};
use xenon_core::{AuthState, Config, GuardDecision};

/// Environment variable consulted before prompting for a password
const PASSWORD_ENV: &str = "XENON_PASSWORD";

/// Exit code for a broken or self-contradicting audit chain
const CHAIN_FAILURE: u8 = 2;

async fn resume(config: &Config) -> Result<SessionManager> {
    let session = SessionManager::from_config(config).context("Failed to set up session")?;
    let state = session.initialize().await;
    debug!("Session resolved to {}", state);
    Ok(session)
}

fn prompt_username(remembered: Option<&str>) -> Result<String> {
    match remembered {
        Some(name) => print!("Usuario [{}]: ", name),
        None => print!("Usuario: "),
    }
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let entered = line.trim();
    match (entered.is_empty(), remembered) {
        (true, Some(name)) => Ok(name.to_string()),
        (true, None) => anyhow::bail!("Username is required"),
        (false, _) => Ok(entered.to_string()),
    }
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        if !password.is_empty() {
            return Ok(password);
        }
    }
    rpassword::prompt_password("Contraseña: ").context("Failed to read password")
}

fn persist_branch(config: &mut Config, session: &SessionManager) -> Result<()> {
    let current = session.branches().current_id();
    if config.branch_id != current {
        config.branch_id = current;
        config.save()?;
    }
    Ok(())
}

pub async fn login(config: &mut Config, username: Option<String>) -> Result<ExitCode> {
    let username = match username {
        Some(name) => name,
        None => prompt_username(config.last_username.as_deref())?,
    };
    let password = read_password()?;

    let session = SessionManager::from_config(config).context("Failed to set up session")?;
    match session.login(&username, &password).await {
        Ok(user) => {
            config.last_username = Some(username);
            config.branch_id = session.branches().current_id();
            config.save()?;

            println!("Bienvenido, {} ({})", user.display_name, user.role.as_str());
            match session.branches().current() {
                Some(branch) => println!("Sucursal: {}", branch),
                None => println!("Selecciona una sucursal con `xenon branch select <id>`"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            Ok(ExitCode::FAILURE)
        }
    }
}

pub async fn logout(config: &Config) -> Result<ExitCode> {
    let session = resume(config).await?;
    let was_signed_in = session.is_authenticated() || session.has_stored_session();
    session.logout().await;
    if was_signed_in {
        println!("Sesión cerrada");
    } else {
        println!("No hay una sesión activa");
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn status(config: &Config) -> Result<ExitCode> {
    let session = resume(config).await?;
    let state = session.state();
    println!("Estado: {}", state);

    if let Some(error) = session.last_error() {
        println!("Último error: {}", error);
    }
    if let Some(user) = session.principal() {
        println!("Usuario: {} <{}>", user.display_name, user.email);
        println!("Rol: {}", user.role.as_str());
        println!("Sucursales: {}", user.accessible_branches().join(", "));
    }
    if let Some(branch) = session.branches().current() {
        println!("Sucursal actual: {}", branch);
    }
    if let Some(remaining) = session.time_until_refresh() {
        println!("Renovación en: {}s", remaining.as_secs());
    }

    Ok(if state == AuthState::Authenticated {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub async fn branch_list(config: &Config) -> Result<ExitCode> {
    let session = resume(config).await?;
    let current = session.branches().current_id();
    for branch in session.branches().available() {
        let marker = if current.as_deref() == Some(branch.id.as_str()) { "*" } else { " " };
        println!("{} {:<20} {}", marker, branch.id, branch.name);
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn branch_select(config: &mut Config, id: &str) -> Result<ExitCode> {
    let session = resume(config).await?;
    match session.select_branch(id) {
        Ok(branch) => {
            persist_branch(config, &session)?;
            println!("Sucursal seleccionada: {}", branch);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Resume the session and check the audit section is readable.
async fn audit_session(config: &Config) -> Result<Option<SessionManager>> {
    let session = resume(config).await?;
    let message = match session.guard(MenuSection::Audit, Permission::View) {
        GuardDecision::Allowed => return Ok(Some(session)),
        GuardDecision::Pending | GuardDecision::LoginRequired => session
            .last_error()
            .unwrap_or_else(|| "Inicia sesión con `xenon login`".to_string()),
        GuardDecision::NoBranchSelected => {
            "Selecciona una sucursal con `xenon branch select <id>`".to_string()
        }
        GuardDecision::Denied => "No tienes acceso a la auditoría en esta sucursal".to_string(),
    };
    eprintln!("{}", message);
    Ok(None)
}

fn print_entry_line(entry: &AuditEntry) {
    let when = entry
        .created_at_utc()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    println!(
        "{:>6}  {}  {:<14} {:<12} {:<12} {}",
        entry.sequence,
        when,
        entry.action.as_str(),
        entry.entity,
        entry.entity_id,
        entry.user_name.as_deref().unwrap_or("-"),
    );
}

pub async fn audit_verify(config: &Config) -> Result<ExitCode> {
    let Some(session) = audit_session(config).await? else {
        return Ok(ExitCode::FAILURE);
    };
    match AuditApi::new(session.api()).verify_chain().await {
        Ok(verdict) => {
            println!("{}", verdict);
            if let ChainVerdict::Broken { mismatches, .. } = &verdict {
                for m in mismatches {
                    println!("  {}: esperado {} encontrado {}", m.id, m.expected_hash, m.found_hash);
                }
            }
            Ok(if verdict.is_intact() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(CHAIN_FAILURE)
            })
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            Ok(ExitCode::FAILURE)
        }
    }
}

pub async fn audit_list(
    config: &Config,
    limit: u32,
    offset: u32,
    entity: Option<String>,
    action: Option<String>,
) -> Result<ExitCode> {
    let action = action
        .map(|a| serde_json::from_value::<AuditAction>(serde_json::Value::String(a.to_uppercase())))
        .transpose()
        .context("Invalid action kind")?;
    let Some(session) = audit_session(config).await? else {
        return Ok(ExitCode::FAILURE);
    };
    let params = ListAuditParams {
        limit: Some(limit),
        offset: Some(offset),
        entity,
        action,
        ..Default::default()
    };
    match AuditApi::new(session.api()).list(&params).await {
        Ok(page) => {
            for entry in &page.data {
                print_entry_line(entry);
            }
            let p = &page.pagination;
            println!(
                "{}-{} de {}{}",
                p.offset,
                p.offset as usize + page.data.len(),
                p.total,
                if p.has_more { " (hay más)" } else { "" }
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            Ok(ExitCode::FAILURE)
        }
    }
}

pub async fn audit_show(config: &Config, id: &str) -> Result<ExitCode> {
    let Some(session) = audit_session(config).await? else {
        return Ok(ExitCode::FAILURE);
    };
    match AuditApi::new(session.api()).get(id).await {
        Ok(entry) => {
            println!("{}", serde_json::to_string_pretty(&entry)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            Ok(ExitCode::FAILURE)
        }
    }
}

pub async fn audit_history(config: &Config, entity: &str, entity_id: &str) -> Result<ExitCode> {
    let Some(session) = audit_session(config).await? else {
        return Ok(ExitCode::FAILURE);
    };
    match AuditApi::new(session.api()).history(entity, entity_id).await {
        Ok(entries) => {
            for entry in &entries {
                print_entry_line(entry);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            Ok(ExitCode::FAILURE)
        }
    }
}

pub async fn audit_stats(config: &Config) -> Result<ExitCode> {
    let Some(session) = audit_session(config).await? else {
        return Ok(ExitCode::FAILURE);
    };
    match AuditApi::new(session.api()).stats().await {
        Ok(stats) => {
            println!("Total: {}", stats.total_entries);
            let mut by_action: Vec<_> = stats.by_action.iter().collect();
            by_action.sort();
            for (action, count) in by_action {
                println!("  {:<14} {}", action, count);
            }
            let mut by_entity: Vec<_> = stats.by_entity.iter().collect();
            by_entity.sort();
            for (entity, count) in by_entity {
                println!("  {:<14} {}", entity, count);
            }
            for day in &stats.by_day {
                println!("  {}  {}", day.date, day.total);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            Ok(ExitCode::FAILURE)
        }
    }
}
