// UI layer: provides a simple interactive menu using `dialoguer`.
// Each entry collects its arguments, calls one `MftClient` operation and
// prints the outcome. A session error from any operation ends the loop.

use crate::api::{MftClient, OperationResult, Payload, TransferProgress, UploadOptions};
use anyhow::Result;
use crossterm::style::Stylize;
use dialoguer::{Confirm, Input, Select};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const ITEMS: [&str; 8] = [
    "Upload file",
    "Download file",
    "List directory",
    "Create folder",
    "Delete",
    "Rename",
    "Check type",
    "Exit",
];

/// Main interactive menu. Runs a select loop until the user chooses "Exit".
pub fn main_menu(client: &MftClient) -> Result<()> {
    let env = client.environment();
    println!(
        "Connected to {} ({})",
        env.base_url().bold(),
        client.mode()
    );
    loop {
        let selection = Select::new()
            .with_prompt("What would you like to do?")
            .items(&ITEMS[..])
            .default(0)
            .interact()?;
        match selection {
            0 => handle_upload(client)?,
            1 => handle_download(client)?,
            2 => {
                let path = prompt_remote("Remote directory", &env.defaults.upload_path)?;
                report(client.list_files(&path)?);
            }
            3 => {
                let path = prompt_remote("New folder path", &env.defaults.upload_path)?;
                report(client.create_folder(&path)?);
            }
            4 => {
                let path = prompt_remote("Path to delete", &env.defaults.upload_path)?;
                let sure = Confirm::new()
                    .with_prompt(format!("Really delete {path}?"))
                    .default(false)
                    .interact()?;
                if sure {
                    report(client.delete(&path)?);
                }
            }
            5 => {
                let old = prompt_remote("Current path", &env.defaults.upload_path)?;
                let new = prompt_remote("New path", &old)?;
                report(client.rename(&old, &new)?);
            }
            6 => {
                let path = prompt_remote("Remote path", &env.defaults.upload_path)?;
                report(client.is_file(&path)?);
            }
            _ => break,
        }
    }
    Ok(())
}

fn prompt_remote(prompt: &str, default: &str) -> Result<String> {
    let value: String = Input::new()
        .with_prompt(prompt)
        .default(default.to_string())
        .interact_text()?;
    Ok(value)
}

fn handle_upload(client: &MftClient) -> Result<()> {
    let local: String = Input::new().with_prompt("Local file").interact_text()?;
    let remote = prompt_remote("Remote directory", &client.environment().defaults.upload_path)?;
    let compress = Confirm::new()
        .with_prompt("Compress with gzip?")
        .default(false)
        .interact()?;

    let bar = upload_bar(Path::new(&local), compress)?;
    let feed = bar.clone();
    let mut options = UploadOptions::default().with_progress(move |p: TransferProgress| {
        if let Some(total) = p.total {
            feed.set_length(total);
        }
        feed.set_position(p.transferred);
    });
    options.compress = compress;

    let outcome = client.upload_file(&local, &remote, options);
    bar.finish_and_clear();
    report(outcome?);
    Ok(())
}

/// A byte bar when the size is known up front, a spinner otherwise.
fn upload_bar(local: &Path, compress: bool) -> Result<ProgressBar> {
    let size = std::fs::metadata(local).ok().map(|m| m.len());
    let bar = match size {
        Some(len) if !compress => {
            let bar = ProgressBar::new(len);
            bar.set_style(ProgressStyle::with_template(
                "{bar:40.cyan/blue} {bytes}/{total_bytes} ({percent}%) {eta}",
            )?);
            bar
        }
        _ => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(ProgressStyle::with_template("{spinner} {bytes} sent")?);
            bar
        }
    };
    Ok(bar)
}

fn handle_download(client: &MftClient) -> Result<()> {
    let remote = prompt_remote("Remote file", &client.environment().defaults.upload_path)?;
    let save = Confirm::new()
        .with_prompt("Save to disk? (no prints it here)")
        .default(true)
        .interact()?;

    if !save {
        let outcome = client.download_file(&remote, None)?;
        return match outcome {
            Ok(success) => {
                if let Payload::Stream(mut stream) = success.data {
                    let stdout = io::stdout();
                    echo_stream(&mut stream, &mut stdout.lock());
                }
                Ok(())
            }
            Err(failure) => {
                report(Err(failure));
                Ok(())
            }
        };
    }

    let default_dest = default_destination(&client.environment().defaults.download_path, &remote);
    let dest: String = Input::new()
        .with_prompt("Save as")
        .default(default_dest.to_string_lossy().into_owned())
        .interact_text()?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.set_message(format!("Downloading {remote}..."));
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    let outcome = client.download_file(&remote, Some(Path::new(&dest)));
    spinner.finish_and_clear();
    report(outcome?);
    Ok(())
}

/// Copy a download body to the terminal. A broken stream or a failed write
/// is reported and the menu carries on.
fn echo_stream(source: &mut impl Read, out: &mut impl Write) -> Option<u64> {
    let copied = io::copy(source, out).and_then(|n| {
        writeln!(out)?;
        out.flush()?;
        Ok(n)
    });
    match copied {
        Ok(n) => Some(n),
        Err(e) => {
            eprintln!("{}", format!("download output failed: {e}").red());
            None
        }
    }
}

/// `<download dir>/<last segment of remote path>`.
fn default_destination(download_dir: &str, remote: &str) -> PathBuf {
    let name = remote
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("download.bin");
    Path::new(download_dir).join(name)
}

/// Print an operation outcome.
fn report(outcome: OperationResult) {
    match outcome {
        Ok(success) => {
            println!("{}", success.message.as_str().green());
            match &success.data {
                Payload::Body(text) => {
                    let pretty = success
                        .data
                        .json()
                        .and_then(|v| serde_json::to_string_pretty(&v).ok());
                    let shown = pretty.as_deref().unwrap_or(text.as_str());
                    if !shown.trim().is_empty() {
                        println!("{shown}");
                    }
                }
                Payload::Saved { local_path, bytes } => {
                    println!("{} written to {}", HumanBytes(*bytes), local_path.display());
                }
                Payload::Stream(_) => {}
            }
        }
        Err(failure) => {
            let status = match (failure.status, failure.status_text.as_deref()) {
                (Some(code), Some(text)) => format!(" [{code} {text}]"),
                (Some(code), None) => format!(" [{code}]"),
                _ => String::new(),
            };
            println!("{}{}", failure.to_string().red(), status);
            if let Some(request) = &failure.request {
                println!("  request: {request}");
            }
        }
    }
}
