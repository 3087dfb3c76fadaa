//! Admin CLI. Invoked as `propserver <command> [args]`; anything else
//! starts the server.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel_migrations::MigrationHarness;
use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::auth::hash_password;
use crate::config::AppConfig;
use crate::directory::users::backfill_manager_rows;
use crate::shared::enums::{Role, ServiceRequestStatus, TaskStatus, TicketStatus};
use crate::shared::models::User;
use crate::shared::schema::{service_requests, tasks, tickets, users};
use crate::shared::settings::ensure_settings;
use crate::shared::utils::{establish_pg_connection, MIGRATIONS};

pub const USAGE: &str = "\
Commands:
  init-db                              create schema and seed settings
  create-admin <username> <email> [password]
  detect-changes                       list migrations not yet applied
  backup [file]                        pg_dump to file
  restore <file>                       psql restore from file
  migrate                              apply pending migrations
  apply-migration <file>               run one SQL file
  fix-timestamps                       backfill missing completed_at values
  promote-to-general-manager <username>";

pub fn run(args: &[String]) -> Result<()> {
    let command = args.first().map(String::as_str).unwrap_or("");
    let config = AppConfig::from_env()?;
    match command {
        "init-db" => init_db(&config),
        "create-admin" => create_admin(&config, args.get(1), args.get(2), args.get(3)),
        "detect-changes" => detect_changes(&config),
        "backup" => backup(&config, args.get(1)),
        "restore" => restore(&config, args.get(1)),
        "migrate" => migrate(&config),
        "apply-migration" => apply_migration(&config, args.get(1)),
        "fix-timestamps" => fix_timestamps(&config),
        "promote-to-general-manager" => promote_to_general_manager(&config, args.get(1)),
        other => bail!("unknown command: {other}\n{USAGE}"),
    }
}

fn init_db(config: &AppConfig) -> Result<()> {
    let mut conn = establish_pg_connection(&config.database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;
    ensure_settings(&mut conn, config).map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("database initialized");
    Ok(())
}

fn create_admin(
    config: &AppConfig,
    username: Option<&String>,
    email: Option<&String>,
    password: Option<&String>,
) -> Result<()> {
    let username = username.context("usage: create-admin <username> <email> [password]")?;
    let email = email.context("usage: create-admin <username> <email> [password]")?;
    let generated;
    let password = match password {
        Some(p) => p.as_str(),
        None => {
            generated = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(16)
                .map(char::from)
                .collect::<String>();
            println!("generated password: {generated}");
            generated.as_str()
        }
    };

    let now = Utc::now();
    let admin = User {
        id: Uuid::new_v4(),
        username: username.clone(),
        email: email.to_lowercase(),
        password_hash: hash_password(password).map_err(|e| anyhow::anyhow!("{e}"))?,
        role: Role::SuperAdmin,
        group_name: None,
        phone: None,
        is_active: true,
        manager_id: None,
        created_at: now,
        updated_at: now,
    };
    let mut conn = establish_pg_connection(&config.database_url)?;
    diesel::insert_into(users::table)
        .values(&admin)
        .execute(&mut conn)
        .context("could not create admin (duplicate username/email?)")?;
    println!("created super_admin {username}");
    Ok(())
}

fn detect_changes(config: &AppConfig) -> Result<()> {
    let mut conn = establish_pg_connection(&config.database_url)?;
    let pending = conn
        .pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("could not inspect migrations: {e}"))?;
    if pending.is_empty() {
        println!("schema is up to date");
    } else {
        println!("{} pending migration(s):", pending.len());
        for migration in pending {
            println!("  {}", migration.name());
        }
    }
    Ok(())
}

fn backup(config: &AppConfig, file: Option<&String>) -> Result<()> {
    let default_name = format!("propserver-backup-{}.sql", Utc::now().format("%Y%m%d-%H%M%S"));
    let file = file.map(String::as_str).unwrap_or(default_name.as_str());
    let status = std::process::Command::new("pg_dump")
        .arg(&config.database_url)
        .arg("--no-owner")
        .arg("-f")
        .arg(file)
        .status()
        .context("failed to spawn pg_dump (is it installed?)")?;
    if !status.success() {
        bail!("pg_dump exited with {status}");
    }
    println!("backup written to {file}");
    Ok(())
}

fn restore(config: &AppConfig, file: Option<&String>) -> Result<()> {
    let file = file.context("usage: restore <file>")?;
    let status = std::process::Command::new("psql")
        .arg(&config.database_url)
        .arg("-v")
        .arg("ON_ERROR_STOP=1")
        .arg("-f")
        .arg(file)
        .status()
        .context("failed to spawn psql (is it installed?)")?;
    if !status.success() {
        bail!("psql exited with {status}");
    }
    println!("restored from {file}");
    Ok(())
}

fn migrate(config: &AppConfig) -> Result<()> {
    let mut conn = establish_pg_connection(&config.database_url)?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;
    println!("applied {} migration(s)", applied.len());
    Ok(())
}

fn apply_migration(config: &AppConfig, file: Option<&String>) -> Result<()> {
    let file = file.context("usage: apply-migration <file>")?;
    let sql = std::fs::read_to_string(file).with_context(|| format!("cannot read {file}"))?;
    let mut conn = establish_pg_connection(&config.database_url)?;
    conn.batch_execute(&sql)
        .with_context(|| format!("failed to apply {file}"))?;
    println!("applied {file}");
    Ok(())
}

/// Completed rows written by older builds can miss `completed_at`; backfill
/// it from `updated_at`.
fn fix_timestamps(config: &AppConfig) -> Result<()> {
    let mut conn = establish_pg_connection(&config.database_url)?;
    let fixed_tickets = diesel::update(
        tickets::table
            .filter(tickets::status.eq(TicketStatus::Completed))
            .filter(tickets::completed_at.is_null()),
    )
    .set(tickets::completed_at.eq(tickets::updated_at.nullable()))
    .execute(&mut conn)?;
    let fixed_tasks = diesel::update(
        tasks::table
            .filter(tasks::status.eq(TaskStatus::Completed))
            .filter(tasks::completed_at.is_null()),
    )
    .set(tasks::completed_at.eq(tasks::updated_at.nullable()))
    .execute(&mut conn)?;
    let fixed_requests = diesel::update(
        service_requests::table
            .filter(service_requests::status.eq(ServiceRequestStatus::Completed))
            .filter(service_requests::completed_at.is_null()),
    )
    .set(service_requests::completed_at.eq(service_requests::updated_at.nullable()))
    .execute(&mut conn)?;
    println!("fixed {fixed_tickets} tickets, {fixed_tasks} tasks, {fixed_requests} service requests");
    Ok(())
}

fn promote_to_general_manager(config: &AppConfig, username: Option<&String>) -> Result<()> {
    let username = username.context("usage: promote-to-general-manager <username>")?;
    let mut conn = establish_pg_connection(&config.database_url)?;
    let user: User = users::table
        .filter(users::username.eq(username))
        .first(&mut conn)
        .with_context(|| format!("no user named {username}"))?;

    conn.transaction::<_, anyhow::Error, _>(|conn| {
        diesel::update(users::table.filter(users::id.eq(user.id)))
            .set((
                users::role.eq(Role::GeneralManager),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
        backfill_manager_rows(conn, user.id).map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(())
    })?;
    println!("{username} is now a general_manager");
    Ok(())
}
