use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use screenshot_uploader::config::{self, get_settings_path};
use screenshot_uploader::logging::init_logging;
use screenshot_uploader::services::{remember_album, remembered_album, Album};
use screenshot_uploader::{
    AppError, AppResult, JsonFileSettings, SettingsStore, UploadCoordinator, UploaderEvent,
};

const USAGE: &str = "\
Usage:
  screenshot-uploader upload [--service <id>] <file>...
  screenshot-uploader authorize [--service <id>] [pin]
  screenshot-uploader logout [--service <id>]
  screenshot-uploader albums [--service <id>] [album-id]
  screenshot-uploader services";

#[tokio::main]
async fn main() -> ExitCode {
    let config = match config::load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            config::UploaderConfig::default()
        }
    };
    init_logging(&config.log_level);

    match run(config, std::env::args().skip(1).collect()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: config::UploaderConfig, args: Vec<String>) -> AppResult<()> {
    let (command, rest) = match args.split_first() {
        Some((command, rest)) => (command.as_str(), rest),
        None => {
            println!("{}", USAGE);
            return Ok(());
        }
    };
    let (service_id, operands) = split_service(rest, &config.default_service)?;

    let settings: Arc<dyn SettingsStore> = Arc::new(JsonFileSettings::open(get_settings_path()?)?);
    let (coordinator, events) = UploadCoordinator::from_config(&config, settings.clone())?;

    let result = match command {
        "upload" => upload(&coordinator, events, &service_id, operands).await,
        "authorize" => authorize(&coordinator, &service_id, operands.first()).await,
        "logout" => coordinator.deauthorize(&service_id),
        "albums" => albums(&coordinator, settings.as_ref(), &service_id, operands.first()).await,
        "services" => {
            for service in coordinator.services() {
                println!("{}\t{}", service.service_id, service.display_name);
            }
            Ok(())
        }
        other => Err(AppError::validation(
            "command",
            &format!("unknown command '{}'\n{}", other, USAGE),
        )),
    };

    coordinator.shutdown().await;
    result
}

fn split_service(args: &[String], default_service: &str) -> AppResult<(String, Vec<String>)> {
    let mut service_id = default_service.to_string();
    let mut operands = Vec::new();

    let mut args = args.iter();
    while let Some(arg) = args.next() {
        if arg == "--service" || arg == "-s" {
            service_id = args
                .next()
                .cloned()
                .ok_or_else(|| AppError::validation("service", "--service needs a value"))?;
        } else {
            operands.push(arg.clone());
        }
    }

    Ok((service_id, operands))
}

async fn upload(
    coordinator: &UploadCoordinator,
    mut events: tokio::sync::mpsc::UnboundedReceiver<UploaderEvent>,
    service_id: &str,
    files: Vec<String>,
) -> AppResult<()> {
    if files.is_empty() {
        return Err(AppError::validation("file", "No files given"));
    }

    let mut pending = 0usize;
    for file in files {
        coordinator.upload(PathBuf::from(file), service_id)?;
        pending += 1;
    }

    let mut failures = 0usize;
    while pending > 0 {
        let Some(event) = events.recv().await else {
            return Err(AppError::CoordinatorStopped);
        };

        match event {
            UploaderEvent::Progress { aggregate } => eprint!("\r{:>3}%", aggregate),
            UploaderEvent::Completed {
                file_path,
                url,
                delete_token,
                ..
            } => {
                pending -= 1;
                eprintln!();
                if delete_token.is_empty() {
                    println!("{}\t{}", file_path.display(), url);
                } else {
                    println!("{}\t{}\t{}", file_path.display(), url, delete_token);
                }
            }
            UploaderEvent::Failed {
                file_path, error, ..
            } => {
                pending -= 1;
                failures += 1;
                eprintln!();
                eprintln!("{}: {}", file_path.display(), error);
            }
            UploaderEvent::AuthRefreshed { service_id } => {
                eprintln!("Refreshed {} session; retry the failed uploads", service_id);
            }
        }
    }

    if failures > 0 {
        return Err(AppError::transport(format!("{} upload(s) failed", failures)));
    }
    Ok(())
}

/// Lists the account's albums, or remembers `album_id` as the upload target.
async fn albums(
    coordinator: &UploadCoordinator,
    settings: &dyn SettingsStore,
    service_id: &str,
    album_id: Option<&String>,
) -> AppResult<()> {
    let albums = coordinator.list_albums(service_id).await?;

    let Some(album_id) = album_id else {
        let current = remembered_album(settings, service_id);
        for album in &albums {
            let marker = if current.as_deref() == Some(album.id.as_str()) { "*" } else { " " };
            println!("{} {}\t{}", marker, album.id, album.display_title());
        }
        return Ok(());
    };

    let album = find_album(&albums, album_id)?;
    remember_album(settings, service_id, &album.id)?;
    println!("Uploads to {} will go to album {}", service_id, album.display_title());
    Ok(())
}

fn find_album<'a>(albums: &'a [Album], album_id: &str) -> AppResult<&'a Album> {
    albums.iter().find(|a| a.id == album_id).ok_or_else(|| {
        AppError::validation("album", &format!("no album with id '{}'", album_id))
    })
}

async fn authorize(
    coordinator: &UploadCoordinator,
    service_id: &str,
    pin: Option<&String>,
) -> AppResult<()> {
    let Some(pin) = pin else {
        println!(
            "Open this page and run `authorize <pin>` with the PIN it shows:\n{}",
            coordinator.authorize_url(service_id)?
        );
        return Ok(());
    };

    let credentials = coordinator.authorize_with_pin(service_id, pin).await?;
    println!("Signed in to {} as {}", service_id, credentials.account_username);
    Ok(())
}
