use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use ldx_export::{background, TextFormat};
use ldx_refs::{
    CancellationToken, ChangeAction, CollectionKind, DatabaseReference, DocumentReference,
    ExplorerConfig, NodeRef, PasswordPrompt, ReferenceChange, ResultTable, StoreRegistry,
};
use ldx_types::text;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => ExplorerConfig::load(path)?,
        None => ExplorerConfig::default(),
    };
    let session = Session {
        registry: StoreRegistry::new(config),
        password: cli.password,
    };
    let result = match cli.command {
        Command::Create(args) => session.cmd_create(args),
        Command::Collections(args) => session.cmd_collections(args),
        Command::Info(args) => session.cmd_info(args),
        Command::Query(args) => session.cmd_query(args),
        Command::Export(args) => session.cmd_export(args).await,
        Command::Rebuild(args) => session.cmd_rebuild(args).await,
        Command::AddCollection(args) => session.cmd_add_collection(args),
        Command::Rename(args) => session.cmd_rename(args),
        Command::Drop(args) => session.cmd_drop(args),
        Command::Import(args) => session.cmd_import(args),
        Command::AddBlob(args) => session.cmd_add_blob(args).await,
        Command::UserVersion(args) => session.cmd_user_version(args),
    };
    settle(result, session.registry.close_all())
}

/// Combine a command's outcome with closing its databases. The command's
/// own error is reported first; a close failure behind it is only logged.
fn settle(result: anyhow::Result<()>, closed: ldx_refs::Result<()>) -> anyhow::Result<()> {
    match (result, closed) {
        (Err(e), Err(close)) => {
            warn!(error = %close, "failed to close databases");
            Err(e)
        }
        (Ok(()), Err(close)) => Err(close.into()),
        (result, Ok(())) => result,
    }
}

/// A cancellation token tripped by Ctrl-C while it is alive.
struct Interrupt {
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
}

impl Interrupt {
    fn watch() -> Self {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });
        Self { cancel, watcher }
    }
}

impl Drop for Interrupt {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

struct Session {
    registry: StoreRegistry,
    password: Option<String>,
}

impl Session {
    fn open(&self, path: &Path) -> anyhow::Result<Rc<DatabaseReference>> {
        let db = match &self.password {
            Some(password) => self.registry.get_or_open(path, Some(password))?,
            None => self
                .registry
                .open_with_prompt(path, prompt_password)
                .map_err(|e| if e.is_canceled() { anyhow!("canceled") } else { e.into() })?,
        };
        Ok(db)
    }

    fn cmd_create(&self, args: CreateArgs) -> anyhow::Result<()> {
        let db = self
            .registry
            .create(&args.database, self.password.as_deref())?;
        let protection = if self.password.is_some() { " (password protected)" } else { "" };
        println!(
            "{} Created {}{}",
            "✓".green().bold(),
            db.location().display().to_string().bold(),
            protection
        );
        Ok(())
    }

    fn cmd_collections(&self, args: DatabaseArgs) -> anyhow::Result<()> {
        let db = self.open(&args.database)?;
        let collections = db.collections();
        if collections.is_empty() {
            println!("No collections.");
            return Ok(());
        }
        for collection in collections {
            let kind = match collection.kind() {
                CollectionKind::Documents => "documents".normal(),
                CollectionKind::Blobs => "files".cyan(),
            };
            println!(
                "{:<24} {:<10} {}",
                collection.name().bold(),
                kind,
                collection.len().to_string().dimmed()
            );
        }
        Ok(())
    }

    fn cmd_info(&self, args: DatabaseArgs) -> anyhow::Result<()> {
        let db = self.open(&args.database)?;
        for (key, value) in db.engine_info()?.iter() {
            println!("{:<18} {}", key.bold(), value.display_text());
        }
        Ok(())
    }

    fn cmd_query(&self, args: QueryArgs) -> anyhow::Result<()> {
        let db = self.open(&args.database)?;
        let result = db.query(&args.command)?;
        if !result.has_value() {
            println!("{}", "(no result)".dimmed());
            return Ok(());
        }
        if args.table {
            print_table(&result.to_table(self.registry.config().key_order));
        } else {
            println!("{}", result.serialize(!args.raw));
        }
        let noun = if result.count() == 1 { "item" } else { "items" };
        eprintln!("{}", format!("{} {noun}", result.count()).dimmed());
        Ok(())
    }

    async fn cmd_export(&self, args: ExportArgs) -> anyhow::Result<()> {
        let db = self.open(&args.database)?;
        let order = self.registry.config().key_order;
        let interrupt = Interrupt::watch();
        let cancel = &interrupt.cancel;

        if let Some(command) = &args.query {
            let format = match args.format {
                ExportFormat::Json => TextFormat::Json,
                ExportFormat::Csv => TextFormat::Csv,
                ExportFormat::Files => bail!("query results cannot be exported as files"),
            };
            let result = db.query(command)?;
            background::export_result(&result, format, order, &args.out, cancel).await?;
            println!("{} Exported {} items to {}", "✓".green(), result.count(), args.out.display());
            return Ok(());
        }

        let name = args
            .collection
            .as_deref()
            .context("a collection or --query is required")?;
        let collection = db
            .collection(name)
            .with_context(|| format!("collection {name} not found"))?;
        let documents = if args.ids.is_empty() {
            collection.documents()
        } else {
            args.ids
                .iter()
                .map(|raw| -> anyhow::Result<Rc<DocumentReference>> {
                    let id = text::parse(raw).with_context(|| format!("bad id {raw}"))?;
                    collection
                        .get(&id)
                        .with_context(|| format!("document {raw} not found in {name}"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?
        };
        debug!(collection = %name, documents = documents.len(), "exporting");

        match args.format {
            ExportFormat::Json => {
                background::export_documents(&documents, TextFormat::Json, order, &args.out, cancel)
                    .await?
            }
            ExportFormat::Csv => {
                background::export_documents(&documents, TextFormat::Csv, order, &args.out, cancel)
                    .await?
            }
            ExportFormat::Files => {
                let written = background::export_blobs(&documents, &args.out, cancel).await?;
                for path in &written {
                    println!("  {}", path.display());
                }
            }
        }
        println!(
            "{} Exported {} documents to {}",
            "✓".green(),
            documents.len(),
            args.out.display()
        );
        Ok(())
    }

    async fn cmd_rebuild(&self, args: RebuildArgs) -> anyhow::Result<()> {
        let password = if args.clear_password {
            None
        } else if let Some(password) = args.new_password {
            Some(password)
        } else if ldx_store::is_password_protected(&args.database)? {
            match &self.password {
                Some(password) => Some(password.clone()),
                None => bail!("database is protected: pass --new-password, --clear-password or --password"),
            }
        } else {
            None
        };

        let db = self.open(&args.database)?;
        let interrupt = Interrupt::watch();
        let size =
            ldx_refs::tasks::rebuild_in_background(&db, password.clone(), &interrupt.cancel).await?;

        let state = if password.is_some() { "protected".yellow() } else { "unprotected".normal() };
        println!("{} Rebuilt {} ({} bytes, {})", "✓".green().bold(), db.name().bold(), size, state);
        Ok(())
    }

    fn cmd_add_collection(&self, args: CollectionArgs) -> anyhow::Result<()> {
        let db = self.open(&args.database)?;
        watch(&db);
        db.add_collection(&args.name)?;
        Ok(())
    }

    fn cmd_rename(&self, args: RenameArgs) -> anyhow::Result<()> {
        let db = self.open(&args.database)?;
        watch(&db);
        db.rename_collection(&args.old, &args.new)?;
        Ok(())
    }

    fn cmd_drop(&self, args: CollectionArgs) -> anyhow::Result<()> {
        let db = self.open(&args.database)?;
        watch(&db);
        db.drop_collection(&args.name)?;
        Ok(())
    }

    fn cmd_import(&self, args: ImportArgs) -> anyhow::Result<()> {
        let input = if args.input == Path::new("-") {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        } else {
            fs::read_to_string(&args.input)
                .with_context(|| format!("reading {}", args.input.display()))?
        };

        let db = self.open(&args.database)?;
        let collection = match db.collection(&args.collection) {
            Some(collection) => collection,
            None if args.create => db.add_collection(&args.collection)?,
            None => bail!("collection {} not found (use --create)", args.collection),
        };
        let added = collection.import_text(&input)?;
        println!(
            "{} Imported {} documents into {}",
            "✓".green().bold(),
            added.len(),
            collection.name().bold()
        );
        Ok(())
    }

    async fn cmd_add_blob(&self, args: AddBlobArgs) -> anyhow::Result<()> {
        let db = self.open(&args.database)?;
        let interrupt = Interrupt::watch();
        let doc =
            ldx_refs::tasks::add_blob_in_background(&db, &args.id, args.file, &interrupt.cancel)
                .await?;
        let size = doc.as_blob().map_or(0, |blob| blob.size());
        println!("{} Stored {} ({} bytes)", "✓".green().bold(), args.id.bold(), size);
        Ok(())
    }

    fn cmd_user_version(&self, args: UserVersionArgs) -> anyhow::Result<()> {
        let db = self.open(&args.database)?;
        match args.value {
            Some(version) => {
                db.set_user_version(version)?;
                println!("{} User version set to {}", "✓".green(), version);
            }
            None => println!("{}", db.user_version()?),
        }
        Ok(())
    }
}

fn prompt_password(request: &PasswordPrompt<'_>) -> Option<String> {
    if request.retry {
        eprintln!("{}", "Invalid password.".red());
    }
    eprint!(
        "Password for {} ({}/{}): ",
        request.path.display(),
        request.attempt,
        request.max_attempts
    );
    let _ = io::stderr().flush();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => {
            let password = line.trim_end_matches(|c| c == '\r' || c == '\n');
            (!password.is_empty()).then(|| password.to_string())
        }
    }
}

/// Print every change published on the database.
fn watch(db: &DatabaseReference) {
    db.node().subscribe(|change: &ReferenceChange| {
        let verb = match change.action {
            ChangeAction::Add => "added".green(),
            ChangeAction::Remove => "removed".red(),
            ChangeAction::Update => "updated".yellow(),
            ChangeAction::Dispose => return Ok(()),
        };
        for entity in &change.entities {
            match entity {
                NodeRef::Collection(c) => println!("{} collection {}", verb, c.name().bold()),
                NodeRef::Document(d) => println!("{} document {}", verb, d.identity_key()),
                NodeRef::Database(_) => {}
            }
        }
        Ok(())
    });
}

fn print_table(table: &ResultTable) {
    let cells: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|v| v.as_ref().map(|v| v.display_text()).unwrap_or_default())
                .collect()
        })
        .collect();
    let widths: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(column.chars().count()))
                .max()
                .unwrap_or(0)
                .min(40)
        })
        .collect();

    let header: Vec<String> = table
        .columns
        .iter()
        .zip(&widths)
        .map(|(c, &w)| format!("{c:<w$}"))
        .collect();
    println!("{}", header.join("  ").bold());
    for row in cells {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{:<w$}", truncate(cell, w)))
            .collect();
        println!("{}", line.join("  "));
    }
}

fn truncate(cell: &str, width: usize) -> String {
    if cell.chars().count() <= width {
        cell.to_string()
    } else {
        let mut short: String = cell.chars().take(width.saturating_sub(1)).collect();
        short.push('…');
        short
    }
}
