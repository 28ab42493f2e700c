//! Command line front end for the vault. Passwords are accepted on the command
//! line for `add` only and are never printed back.

use std::env;
use std::sync::Once;

use account_vault::config::AppConfig;
use account_vault::crypto::keys::{derive_user_key, device_key, generate_passphrase};
use account_vault::settings::{Settings, SettingsFile};
use account_vault::store::SortField;
use account_vault::{AccountRecord, Session, VaultError, VaultKey};
use tokio::runtime::Handle;

/// Environment variable holding the passphrase to switch to on `rekey`.
const NEW_PASSPHRASE_ENV: &str = "ACCOUNT_VAULT_NEW_PASSPHRASE";

static INIT_LOGGER: Once = Once::new();

fn init_logging(filter: Option<&str>) {
    INIT_LOGGER.call_once(|| {
        let env = env_logger::Env::default().default_filter_or(filter.unwrap_or("warn"));
        env_logger::Builder::from_env(env).format_timestamp_micros().init();
    });
}

fn print_usage() {
    eprintln!("Commands:\n  init\n  add <login> <password> [nickname]\n  list\n  search <query>\n  pin <index>\n  unpin <index>\n  remove <index>\n  sort <id|added|updated|level> [desc]\n  rekey\n  gen-passphrase\n\nThe bootstrap config is read from $ACCOUNT_VAULT_CONFIG. `rekey` switches to the\npassphrase in ${NEW_PASSPHRASE_ENV}, or to the device key when it is unset.");
}

enum Command {
    Init,
    Add {
        login: String,
        password: String,
        nickname: Option<String>,
    },
    List,
    Search(String),
    Pin(usize),
    Unpin(usize),
    Remove(usize),
    Sort { field: SortField, descending: bool },
    Rekey,
    GenPassphrase,
}

fn parse_command(args: &[String]) -> Option<Command> {
    let index = |value: &String| value.parse::<usize>().ok();
    let command = match (args.first()?.as_str(), &args[1..]) {
        ("init", []) => Command::Init,
        ("add", [login, password]) => Command::Add {
            login: login.clone(),
            password: password.clone(),
            nickname: None,
        },
        ("add", [login, password, nickname]) => Command::Add {
            login: login.clone(),
            password: password.clone(),
            nickname: Some(nickname.clone()),
        },
        ("list", []) => Command::List,
        ("search", [query]) => Command::Search(query.clone()),
        ("pin", [i]) => Command::Pin(index(i)?),
        ("unpin", [i]) => Command::Unpin(index(i)?),
        ("remove", [i]) => Command::Remove(index(i)?),
        ("sort", [field]) => Command::Sort {
            field: field.parse().ok()?,
            descending: false,
        },
        ("sort", [field, order]) if order == "desc" => Command::Sort {
            field: field.parse().ok()?,
            descending: true,
        },
        ("rekey", []) => Command::Rekey,
        ("gen-passphrase", []) => Command::GenPassphrase,
        _ => return None,
    };
    Some(command)
}

/// Passphrase from the environment first, then a key remembered in the
/// settings, then the device key.
fn active_key(config: &AppConfig, settings: &Settings, device: &VaultKey) -> Result<VaultKey, String> {
    if let Some(passphrase) = config.passphrase() {
        return derive_user_key(&passphrase).map_err(|e| format!("passphrase rejected: {e}"));
    }
    match settings.remembered_key() {
        Ok(Some(key)) => Ok(key),
        Ok(None) => Ok(device.clone()),
        Err(e) => Err(format!("remembered key unusable: {e}")),
    }
}

fn print_record(index: usize, record: &AccountRecord) {
    let marker = if record.pinned { "*" } else { " " };
    let guard = if record.has_authenticator() { " [2fa]" } else { "" };
    println!("{index:>4} {marker} {:<24} {}{guard}", record.login, record.nickname);
}

async fn execute(config: &AppConfig, command: Command) -> Result<(), String> {
    if let Command::GenPassphrase = command {
        println!("{}", generate_passphrase());
        return Ok(());
    }

    let device = device_key(config.machine_id_path.as_deref())
        .map_err(|e| format!("device key unavailable: {e}"))?;
    let settings_file = SettingsFile::new(config.settings_path());
    let mut settings = settings_file
        .load(&device)
        .map_err(|e| format!("settings load failed: {e}"))?;
    let key = active_key(config, &settings, &device)?;

    let mut session = Session::open_with_config(config, key.clone(), Handle::current()).map_err(|err| match err {
        VaultError::AuthenticationFailed => {
            "database could not be decrypted with this key; set the configured passphrase variable".to_string()
        }
        other => format!("vault open failed: {other}"),
    })?;

    let outcome = match command {
        Command::Init => {
            if !settings_file.path().exists() {
                settings_file
                    .save(&settings, &device)
                    .map_err(|e| format!("settings save failed: {e}"))?;
            }
            session
                .save_after(std::time::Duration::ZERO)
                .map(|()| println!("vault ready with {} accounts", session.store().len()))
        }
        Command::Add {
            login,
            password,
            nickname,
        } => {
            let mut record = AccountRecord::new(login, password).map_err(|e| format!("{e}"))?;
            if let Some(nickname) = nickname {
                record = record.with_nickname(nickname);
            }
            session
                .store_mut()
                .add(record)
                .and_then(|index| session.save().map(|()| println!("added at {index}")))
        }
        Command::List => {
            for (index, record) in session.store().records().iter().enumerate() {
                print_record(index, record);
            }
            Ok(())
        }
        Command::Search(query) => {
            let store = session.store();
            for index in store.search(&query) {
                if let Some(record) = store.get(index) {
                    print_record(index, record);
                }
            }
            Ok(())
        }
        Command::Pin(index) => session
            .store_mut()
            .pin(index)
            .and_then(|to| session.save().map(|()| println!("pinned, now at {to}"))),
        Command::Unpin(index) => session
            .store_mut()
            .unpin(index)
            .and_then(|to| session.save().map(|()| println!("unpinned, now at {to}"))),
        Command::Remove(index) => session
            .store_mut()
            .remove(index)
            .and_then(|record| session.save().map(|()| println!("removed {}", record.login))),
        Command::Sort { field, descending } => {
            session.store_mut().sort_unpinned(field, descending);
            session.save()
        }
        Command::Rekey => {
            let new_key = match env::var(NEW_PASSPHRASE_ENV) {
                Ok(passphrase) if !passphrase.is_empty() => {
                    derive_user_key(&passphrase).map_err(|e| format!("new passphrase rejected: {e}"))?
                }
                _ => device.clone(),
            };
            let remembered = matches!(settings.remembered_key(), Ok(Some(_)));
            let result = session.rekey(&key, new_key.clone()).await;
            if result.is_ok() && remembered {
                settings.remember_key(Some(&new_key));
                settings_file
                    .save(&settings, &device)
                    .map_err(|e| format!("settings save failed: {e}"))?;
            }
            result.map(|()| println!("database re-encrypted"))
        }
        Command::GenPassphrase => Ok(()),
    };

    let closed = session.close().await;
    outcome.map_err(|e| format!("{e}"))?;
    closed.map_err(|e| format!("final save failed: {e}"))
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1..).and_then(parse_command) else {
        return print_usage();
    };

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => return eprintln!("config load failed: {err}"),
    };
    init_logging(config.log_filter.as_deref());

    if let Err(err) = execute(&config, command).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
