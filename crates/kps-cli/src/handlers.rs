//! Command handlers.

use crate::commands::AdminCommands;
use crate::config::{Backend, KpsConfig};
use chrono::Utc;
use console::style;
use kps_core::ports::{RemoteAuthority, TrustStore};
use kps_core::{Error, OwnerDetails, Term};
use kps_db::Database;
use kps_licensing::machine;
use kps_licensing::{
    AdminGate, Backup, FileTrustStore, IssueRequest, IssuedLicense, Issuer, LicenseContext,
    LicenseValidator, MemoryAuthority, RestAuthority, RestConfig, SignatureScheme, TrustPolicy,
    ValidationResult,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

fn trust_store(config: &KpsConfig) -> CliResult<Arc<dyn TrustStore>> {
    let dir = config.data_dir()?;
    let store: Arc<dyn TrustStore> = Arc::new(FileTrustStore::open(&dir)?);
    Ok(store)
}

/// Authority used to validate keys on this install.
///
/// The memory backend keeps nothing between runs, so a client configured
/// with it validates locally instead of asking an empty store.
async fn connect_authority(config: &KpsConfig) -> CliResult<Option<Arc<dyn RemoteAuthority>>> {
    match config.authority.backend {
        Backend::None => Ok(None),
        Backend::Memory => {
            warn!("Memory backend holds no records between runs; validating locally");
            Ok(None)
        }
        Backend::Rest | Backend::Postgres => Ok(Some(remote_authority(config).await?)),
    }
}

/// Authority for admin commands. The memory backend is accepted as a dry run.
async fn admin_authority(config: &KpsConfig) -> CliResult<Arc<dyn RemoteAuthority>> {
    match config.authority.backend {
        Backend::None => Err(Error::Config("no remote authority configured".to_string()).into()),
        Backend::Memory => {
            warn!("Memory backend in use; admin changes are discarded on exit");
            eprintln!(
                "{} Dry run: the memory backend discards records when this command exits",
                style("!").yellow()
            );
            Ok(Arc::new(MemoryAuthority::new()))
        }
        Backend::Rest | Backend::Postgres => remote_authority(config).await,
    }
}

async fn remote_authority(config: &KpsConfig) -> CliResult<Arc<dyn RemoteAuthority>> {
    let authority: Arc<dyn RemoteAuthority> = match config.authority.backend {
        Backend::None | Backend::Memory => {
            return Err(Error::Config(format!(
                "{:?} backend is not a remote authority",
                config.authority.backend
            ))
            .into());
        }
        Backend::Rest => {
            let url = config
                .authority
                .url
                .clone()
                .ok_or_else(|| Error::Config("authority.url is required for rest".to_string()))?;
            let mut rest = RestConfig::new(url, config.authority.api_key.clone().unwrap_or_default());
            rest.timeout = config.remote_timeout();
            Arc::new(RestAuthority::new(rest)?)
        }
        Backend::Postgres => {
            let url = config.authority.database_url.as_deref().ok_or_else(|| {
                Error::Config("authority.database_url is required for postgres".to_string())
            })?;
            let db = Database::connect(url).await?;
            db.migrate().await?;
            Arc::new(db.authority())
        }
    };
    Ok(authority)
}

fn policy(config: &KpsConfig) -> TrustPolicy {
    TrustPolicy {
        offline_fallback: config.offline_fallback,
        remote_timeout: config.remote_timeout(),
    }
}

async fn open_context(config: &KpsConfig) -> CliResult<LicenseContext> {
    let store = trust_store(config)?;
    let mut validator = LicenseValidator::new(SignatureScheme::default(), policy(config));
    if let Some(authority) = connect_authority(config).await? {
        validator = validator.with_authority(authority);
    }
    Ok(LicenseContext::open(store, validator, config.free_option_limit).await?)
}

fn print_result(result: &ValidationResult) {
    if result.valid {
        println!("{} {}", style("✓").green(), result.message());
    } else {
        println!("{} {}", style("✗").red(), result.message());
    }
    if let Some(plan) = &result.plan {
        println!("  Plan: {}", plan);
    }
    if let Some(expiry) = result.expiry {
        println!("  Expires: {}", expiry.format("%Y-%m-%d %H:%M UTC"));
    }
}

/// Print this install's machine id.
pub fn machine_id(config: &KpsConfig) -> CliResult {
    let store = trust_store(config)?;
    let fingerprint = machine::get_or_create(store.as_ref())?;
    println!("{}", fingerprint);
    Ok(())
}

/// Activate a license key.
pub async fn activate(config: &KpsConfig, key: &str) -> CliResult {
    let mut context = open_context(config).await?;
    let result = context.activate(key).await?;
    print_result(&result);
    if !result.valid {
        return Err(format!("activation failed: {}", result.message()).into());
    }
    Ok(())
}

/// Show license status.
pub async fn status(config: &KpsConfig, json: bool) -> CliResult {
    let context = open_context(config).await?;

    if json {
        let report = serde_json::json!({
            "machine_id": context.fingerprint(),
            "entitlement": context.state(),
            "validation": context.last_result(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Machine: {}", style(context.fingerprint()).bold());
    match context.last_result() {
        Some(result) => print_result(result),
        None => println!(
            "{} Not licensed (up to {} options)",
            style("i").blue(),
            config.free_option_limit
        ),
    }
    Ok(())
}

/// Remove the stored key.
pub async fn deactivate(config: &KpsConfig) -> CliResult {
    let mut context = open_context(config).await?;
    context.deactivate()?;
    println!("{} License removed", style("✓").green());
    Ok(())
}

/// Show or update the shop profile.
pub async fn profile(
    config: &KpsConfig,
    shop: Option<String>,
    owner: Option<String>,
    phone: Option<String>,
    address: Option<String>,
) -> CliResult {
    let context = open_context(config).await?;
    let mut profile = context.profile()?;

    if shop.is_none() && owner.is_none() && phone.is_none() && address.is_none() {
        println!("  shop: {}", profile.shop_name);
        println!("  owner: {}", profile.owner_name);
        println!("  phone: {}", profile.phone);
        println!("  address: {}", profile.address);
        return Ok(());
    }

    if let Some(v) = shop {
        profile.shop_name = v;
    }
    if let Some(v) = owner {
        profile.owner_name = v;
    }
    if let Some(v) = phone {
        profile.phone = v;
    }
    if let Some(v) = address {
        profile.address = v;
    }

    if context.update_profile(profile).await? {
        println!("{} Profile saved and registered", style("✓").green());
    } else {
        println!(
            "{} Profile saved locally; authority not updated",
            style("!").yellow()
        );
    }
    Ok(())
}

fn admin_password(password: Option<String>) -> CliResult<String> {
    match password {
        Some(p) => Ok(p),
        None => Ok(dialoguer::Password::new()
            .with_prompt("Admin password")
            .interact()?),
    }
}

fn print_issued(issued: &IssuedLicense) {
    println!("{} {}", style("✓").green(), style(issued.key_string()).bold());
    println!("  Machine: {}", issued.record.machine_id);
    println!("  Plan: {}", issued.record.plan);
    if let Ok(term) = issued.record.term() {
        println!("  Term: {}", term);
    }
    if let Some(expiry) = issued.record.expires_at() {
        println!("  Expires: {}", expiry.format("%Y-%m-%d %H:%M UTC"));
    }
}

/// Run an admin command after checking the password.
pub async fn admin(
    config: &KpsConfig,
    password: Option<String>,
    command: AdminCommands,
) -> CliResult {
    let store = trust_store(config)?;
    let gate = AdminGate::new(store, config.default_admin_password.clone());
    let password = admin_password(password)?;
    gate.verify(&password)?;

    if let AdminCommands::SetPassword = command {
        let new_password = dialoguer::Password::new()
            .with_prompt("New admin password")
            .with_confirmation("Confirm password", "Passwords do not match")
            .interact()?;
        gate.set_password(&password, &new_password)?;
        info!("Admin password changed");
        println!("{} Admin password changed", style("✓").green());
        return Ok(());
    }

    let authority = admin_authority(config).await?;
    let issuer = Issuer::new(authority.clone(), SignatureScheme::default());

    match command {
        AdminCommands::Generate {
            machine,
            days,
            plan,
            price,
            shop,
            owner,
            phone,
            address,
        } => {
            let owner = if shop.is_some() || owner.is_some() || phone.is_some() || address.is_some()
            {
                Some(OwnerDetails {
                    shop_name: shop.unwrap_or_default(),
                    owner_name: owner.unwrap_or_default(),
                    phone: phone.unwrap_or_default(),
                    address: address.unwrap_or_default(),
                })
            } else {
                None
            };
            let issued = issuer
                .generate(IssueRequest {
                    machine_id: machine,
                    term: Term::from_days(days)?,
                    plan,
                    owner,
                    price,
                })
                .await?;
            info!(
                authority = authority.name(),
                record_id = %issued.record.id,
                machine_id = %issued.record.machine_id,
                "Admin generated license"
            );
            print_issued(&issued);
        }
        AdminCommands::Transfer { key, to } => {
            let issued = issuer.transfer(&key, &to).await?;
            info!(
                authority = authority.name(),
                record_id = %issued.record.id,
                machine_id = %issued.record.machine_id,
                "Admin transferred license"
            );
            print_issued(&issued);
        }
        AdminCommands::Renew { key, days, plan } => {
            let issued = issuer
                .renew(&key, Term::from_days(days)?, plan.as_deref())
                .await?;
            info!(
                authority = authority.name(),
                record_id = %issued.record.id,
                machine_id = %issued.record.machine_id,
                "Admin renewed license"
            );
            print_issued(&issued);
        }
        AdminCommands::List { json } => list(authority.as_ref(), json).await?,
        AdminCommands::Export { file } => export(authority.as_ref(), &file).await?,
        AdminCommands::Import { file } => import(authority.as_ref(), &file).await?,
        AdminCommands::SetPassword => {}
    }
    Ok(())
}

async fn list(authority: &dyn RemoteAuthority, json: bool) -> CliResult {
    let records = authority.list().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("{} No license records", style("i").blue());
        return Ok(());
    }

    let now = Utc::now();
    for record in &records {
        let status = record.effective_status(now);
        println!(
            "{:<20} {:<10} {:<12} {:>12}  {}",
            record.machine_id,
            record.plan,
            status.to_string(),
            record.remaining_at(now).to_string(),
            style(&record.key).dim()
        );
    }
    println!("\n{} records", records.len());
    Ok(())
}

async fn export(authority: &dyn RemoteAuthority, file: &Path) -> CliResult {
    let backup = Backup::export(authority).await?;
    backup.write(file).await?;
    println!(
        "{} Exported {} records to {}",
        style("✓").green(),
        backup.records.len(),
        file.display()
    );
    Ok(())
}

async fn import(authority: &dyn RemoteAuthority, file: &Path) -> CliResult {
    let backup = Backup::read(file).await?;
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(format!(
            "Import {} records exported at {}?",
            backup.records.len(),
            backup.exported_at.format("%Y-%m-%d %H:%M UTC")
        ))
        .default(false)
        .interact()?;

    if !confirmed {
        println!("{} Cancelled", style("!").yellow());
        return Ok(());
    }

    let restored = backup.import(authority).await?;
    info!(authority = authority.name(), restored, "Admin imported backup");
    println!("{} Imported {} records", style("✓").green(), restored);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &KpsConfig) -> CliResult {
    println!("Current configuration:");
    match config.data_dir() {
        Ok(dir) => println!("  data_dir: {}", dir.display()),
        Err(_) => println!("  data_dir: (not set)"),
    }
    println!("  authority.backend: {:?}", config.authority.backend);
    println!(
        "  authority.url: {}",
        config.authority.url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  authority.api_key: {}",
        if config.authority.api_key.is_some() {
            "***"
        } else {
            "(not set)"
        }
    );
    println!(
        "  authority.database_url: {}",
        if config.authority.database_url.is_some() {
            "***"
        } else {
            "(not set)"
        }
    );
    println!("  remote_timeout_secs: {}", config.remote_timeout_secs);
    println!("  offline_fallback: {}", config.offline_fallback);
    println!("  free_option_limit: {}", config.free_option_limit);
    println!("  log_format: {:?}", config.log_format);

    if let Ok(path) = KpsConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> CliResult {
    let mut config = KpsConfig::load()?;
    config.set(key, value)?;
    config.save()?;

    println!("{} Set {}", style("✓").green(), key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(backend: Backend) -> KpsConfig {
        let mut config = KpsConfig::default();
        config.authority.backend = backend;
        config
    }

    #[tokio::test]
    async fn test_memory_backend_stays_out_of_client_validation() {
        let authority = connect_authority(&config_with(Backend::Memory))
            .await
            .unwrap();
        assert!(authority.is_none());
    }

    #[tokio::test]
    async fn test_memory_backend_serves_admin_dry_runs() {
        let authority = admin_authority(&config_with(Backend::Memory))
            .await
            .unwrap();
        assert_eq!(authority.name(), "memory");
    }

    #[tokio::test]
    async fn test_admin_requires_some_backend() {
        assert!(admin_authority(&config_with(Backend::None)).await.is_err());
        assert!(connect_authority(&config_with(Backend::None))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rest_backend_needs_url() {
        let err = connect_authority(&config_with(Backend::Rest))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("authority.url"));
    }
}
