//! folio CLI entry point.
//!
//! A thin front end over the document model: inspect, create and rewrite
//! `.ipynb` files, and manage the recently opened list.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use folio::recent::{RecentDocuments, RecentItem};
use folio::settings::{load_settings, AppSettings};
use folio::{codec, CellKind, Rendered, Worksheet};
use log::info;

#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(about = "Inspect and maintain Jupyter notebooks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a notebook's cells and results
    Show {
        path: PathBuf,

        /// Print the notebook as folio would save it
        #[arg(long)]
        json: bool,
    },

    /// Create an empty notebook
    New {
        path: PathBuf,

        /// Kernel name (default: from settings)
        #[arg(long)]
        kernel: Option<String>,
    },

    /// Rewrite a notebook in folio's canonical form
    Normalize { path: PathBuf },

    /// Recently opened notebooks
    Recent {
        #[command(subcommand)]
        action: Option<RecentAction>,
    },
}

#[derive(Subcommand, Debug)]
enum RecentAction {
    /// List recently opened notebooks (default)
    List,

    /// Drop a notebook from the list
    Forget { path: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let settings = load_settings();

    match cli.command {
        Commands::Show { path, json } => show(&settings, &path, json),
        Commands::New { path, kernel } => {
            let kernel = kernel.unwrap_or_else(|| settings.default_kernelname.clone());
            new_notebook(&path, &kernel)
        }
        Commands::Normalize { path } => normalize(&settings, &path),
        Commands::Recent { action } => {
            let mut recent = RecentDocuments::open(settings.recent_store_path());
            match action.unwrap_or(RecentAction::List) {
                RecentAction::List => {
                    for item in recent.items() {
                        if let Some(pathname) = &item.pathname {
                            println!("{}", pathname.display());
                        }
                    }
                }
                RecentAction::Forget { path } => {
                    let path = absolute(&path)?;
                    if !recent.remove(&path) {
                        bail!("{} is not in the recent list", path.display());
                    }
                }
            }
            Ok(())
        }
    }
}

fn open(settings: &AppSettings, path: &Path) -> anyhow::Result<Worksheet> {
    let path = absolute(path)?;
    let mut worksheet = Worksheet::new(Some(path.clone()));
    worksheet
        .load_from_disk()
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut recent = RecentDocuments::open(settings.recent_store_path());
    recent.add(RecentItem::new(path));
    Ok(worksheet)
}

fn show(settings: &AppSettings, path: &Path, json: bool) -> anyhow::Result<()> {
    let worksheet = open(settings, path)?;

    if json {
        print!("{}", codec::to_json_string(&codec::save(&worksheet))?);
        return Ok(());
    }

    println!(
        "{} ({} cells, kernel {})",
        worksheet.get_name().unwrap_or_default(),
        worksheet.get_cell_count(),
        worksheet.get_kernelname()
    );
    for (index, cell) in worksheet.cells().iter().enumerate() {
        let marker = match cell.kind() {
            CellKind::Code => "In",
            CellKind::Markdown => "Md",
        };
        let count = cell
            .result()
            .and_then(|r| r.execution_count())
            .map(|n| n.to_string())
            .unwrap_or_else(|| " ".to_string());
        println!("\n{marker} [{count}] #{index}");
        for line in cell.get_all_text().lines() {
            println!("    {line}");
        }
        if cell.is_code() {
            if let Some(result) = cell.result() {
                println!("  => {}", describe(&result.rendered()));
            }
        }
    }
    Ok(())
}

fn describe(rendered: &Rendered) -> String {
    match rendered {
        Rendered::Image { mime, bytes } => format!("<{mime}, {} bytes>", bytes.len()),
        Rendered::Svg(_) => "<svg>".to_string(),
        Rendered::Html(html) => format!("<html> {}", html.trim()),
        Rendered::Latex(text) | Rendered::Markdown(text) | Rendered::Text(text) => {
            text.trim_end().to_string()
        }
        Rendered::Json(value) => value.to_string(),
        Rendered::Empty => "<empty>".to_string(),
    }
}

fn new_notebook(path: &Path, kernel: &str) -> anyhow::Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    let mut worksheet = Worksheet::new(None);
    worksheet.set_kernelname(kernel);
    worksheet.create_cell(None, "");
    worksheet.save_as(absolute(path)?)?;
    info!("Created {}", path.display());
    Ok(())
}

fn normalize(settings: &AppSettings, path: &Path) -> anyhow::Result<()> {
    let mut worksheet = open(settings, path)?;
    worksheet.save_to_disk()?;
    println!(
        "Rewrote {} ({} cells)",
        path.display(),
        worksheet.get_cell_count()
    );
    Ok(())
}

/// Recent entries are keyed by absolute path.
fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    Ok(cwd.join(path))
}
