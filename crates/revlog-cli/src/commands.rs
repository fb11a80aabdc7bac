use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use revlog_refs::{
    annex_ref, annotation_ref, entity_meta_ref, BatchRefUpdate, CommandStatus, RefStore,
};
use revlog_store::ObjectStore;
use revlog_txn::{
    CommitSpec, DraftEdit, ExpectedState, FsRepositoryManager, PurgeKeyRewrite, Repository,
    RepositoryManager, TreeEdit, TxnConfig, UpdateManager,
};
use revlog_types::{AccountId, EntityId, Identity, ObjectId, RepoName};
use tracing::debug;

use crate::cli::*;

const CONFIG_FILE: &str = "revlog.toml";

/// Everything a command needs besides its own arguments.
struct Env {
    root: PathBuf,
    repos: Arc<FsRepositoryManager>,
    config: TxnConfig,
    dry_run: bool,
    format: OutputFormat,
}

impl Env {
    fn load(cli: &Cli) -> anyhow::Result<Self> {
        let path = cli.config.clone().or_else(|| {
            let default = cli.root.join(CONFIG_FILE);
            default.is_file().then_some(default)
        });
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                TxnConfig::from_toml_str(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => TxnConfig::default(),
        };
        debug!(root = %cli.root.display(), shared = %config.shared_repo, "loaded configuration");
        Ok(Self {
            root: cli.root.clone(),
            repos: Arc::new(FsRepositoryManager::new(&cli.root)),
            config,
            dry_run: cli.dry_run,
            format: cli.format.clone(),
        })
    }

    fn transaction(&self, project: RepoName, label: &str) -> anyhow::Result<UpdateManager> {
        let mut txn = UpdateManager::new(
            project,
            Arc::clone(&self.repos) as Arc<dyn RepositoryManager>,
            self.config.clone(),
        );
        txn.set_caller_label(label)?;
        Ok(txn)
    }

    /// Run `f` against an open repository and close it afterwards.
    fn with_repo<T>(
        &self,
        name: &RepoName,
        f: impl FnOnce(&Repository) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let repo = self.repos.open(name)?;
        let result = f(&repo);
        repo.close();
        result
    }
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let env = Env::load(&cli)?;
    match cli.command {
        Command::Init(args) => cmd_init(&env, args),
        Command::Put(args) => cmd_put(&env, args),
        Command::Draft(args) => cmd_draft(&env, args),
        Command::Purge(args) => cmd_purge(&env, args),
        Command::Delete(args) => cmd_delete(&env, args),
        Command::Refs(args) => cmd_refs(&env, args),
        Command::Log(args) => cmd_log(&env, args),
    }
}

fn cmd_init(env: &Env, args: InitArgs) -> anyhow::Result<()> {
    let project = RepoName::new(args.project)?;
    std::fs::create_dir_all(&env.root)
        .with_context(|| format!("creating {}", env.root.display()))?;
    env.repos.create(&project)?;
    env.repos.create(&env.config.shared_repo)?;

    let config_path = env.root.join(CONFIG_FILE);
    if !config_path.exists() {
        std::fs::write(&config_path, env.config.to_toml_string()?)
            .with_context(|| format!("writing {}", config_path.display()))?;
    }
    println!(
        "{} Initialized {} in {}",
        "✓".green().bold(),
        project.as_str().bold(),
        env.root.display()
    );
    println!("  Shared repository: {}", env.config.shared_repo.as_str().cyan());
    Ok(())
}

fn commit_spec(env: &Env, args: &CommitArgs) -> CommitSpec {
    let author = Identity::new(
        args.author.clone().unwrap_or_else(|| env.config.server_name.clone()),
        args.email.clone().unwrap_or_else(|| env.config.server_email.clone()),
    );
    let mut spec = CommitSpec::new(author, args.message.clone());
    for (key, value) in &args.set {
        spec = spec.put(key.clone(), value.clone().into_bytes());
    }
    for key in &args.remove {
        spec = spec.remove(key.clone());
    }
    spec
}

fn expected_state(args: &CommitArgs) -> anyhow::Result<Option<ExpectedState>> {
    let Some(text) = args.expect.as_deref() else {
        return Ok(None);
    };
    let state = text
        .parse::<ExpectedState>()
        .with_context(|| format!("invalid expected state '{text}'"))?;
    Ok(Some(state))
}

fn cmd_put(env: &Env, args: PutArgs) -> anyhow::Result<()> {
    let project = RepoName::new(args.project.clone())?;
    let entity = EntityId::new(args.entity)?;
    let spec = commit_spec(env, &args.commit);
    let mut edit = if args.annotation {
        TreeEdit::annotation(project.clone(), entity, spec)
    } else {
        TreeEdit::metadata(project.clone(), entity, spec)
    };
    if args.create {
        edit = edit.allow_new_ref();
    }
    if let Some(expected) = expected_state(&args.commit)? {
        edit = edit.with_expected_state(expected);
    }

    let mut txn = env.transaction(project, "revlog put")?;
    if args.annotation {
        txn.add_annotation_edit(Box::new(edit))?;
    } else {
        txn.add_metadata_edit(Box::new(edit))?;
    }
    report(env, txn.execute_with(env.dry_run)?);
    Ok(())
}

fn cmd_draft(env: &Env, args: DraftArgs) -> anyhow::Result<()> {
    let project = RepoName::new(args.project.clone())?;
    let entity = EntityId::new(args.entity)?;
    let account = AccountId::new(args.account)?;
    let mut edit = DraftEdit::new(project.clone(), entity, account, commit_spec(env, &args.commit));
    if let Some(expected) = expected_state(&args.commit)? {
        edit = edit.with_expected_state(expected);
    }

    let mut txn = env.transaction(project, "revlog draft")?;
    txn.add_annex_edit(Box::new(edit))?;
    txn.execute_with(env.dry_run)?;

    let name = annex_ref(entity, account);
    let tip = env.with_repo(&env.config.shared_repo, |repo| Ok(repo.refs().resolve(&name)?))?;
    if env.dry_run {
        println!("{} {} unchanged", "(dry run)".dimmed(), name);
    } else if tip.is_null() {
        println!("Nothing to do.");
    } else {
        println!("{} {} -> {}", "✓".green().bold(), name, tip.short_hex().yellow());
    }
    Ok(())
}

fn cmd_purge(env: &Env, args: PurgeArgs) -> anyhow::Result<()> {
    let project = RepoName::new(args.project.clone())?;
    let entity = EntityId::new(args.entity)?;
    let mut txn = env.transaction(project.clone(), "revlog purge")?;
    txn.add_rewrite(Box::new(PurgeKeyRewrite::new(project, entity, args.key)))?;
    report(env, txn.execute_with(env.dry_run)?);
    Ok(())
}

fn cmd_delete(env: &Env, args: DeleteArgs) -> anyhow::Result<()> {
    let project = RepoName::new(args.project.clone())?;
    let entity = EntityId::new(args.entity)?;
    let mut txn = env.transaction(project, "revlog delete")?;
    txn.mark_for_deletion(entity)?;
    report(env, txn.execute_with(env.dry_run)?);
    Ok(())
}

fn cmd_refs(env: &Env, args: RefsArgs) -> anyhow::Result<()> {
    let name = RepoName::new(args.repo)?;
    let refs = env.with_repo(&name, |repo| Ok(repo.refs().list_refs(&args.prefix)?))?;
    match env.format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = refs
                .into_iter()
                .map(|(name, id)| (name, serde_json::Value::String(id.to_hex())))
                .collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        OutputFormat::Text => {
            if refs.is_empty() {
                println!("No refs.");
            }
            for (name, id) in refs {
                println!("{} {}", id.short_hex().yellow(), name);
            }
        }
    }
    Ok(())
}

fn cmd_log(env: &Env, args: LogArgs) -> anyhow::Result<()> {
    let project = RepoName::new(args.project)?;
    let entity = EntityId::new(args.entity)?;
    let (repo_name, ref_name) = match args.account {
        Some(account) => (
            env.config.shared_repo.clone(),
            annex_ref(entity, AccountId::new(account)?),
        ),
        None if args.annotation => (project, annotation_ref(entity)),
        None => (project, entity_meta_ref(entity)),
    };

    env.with_repo(&repo_name, |repo| {
        let mut next = repo.refs().resolve(&ref_name)?.non_null();
        if next.is_none() {
            println!("No history for {ref_name}.");
        }
        let mut shown = 0;
        while let Some(id) = next {
            if shown == args.limit {
                break;
            }
            let commit = repo.objects().read_commit(&id)?;
            if args.oneline {
                println!("{} {}", id.short_hex().yellow(), commit.message);
            } else {
                println!("{} {}", "commit".yellow(), id.to_hex().yellow());
                println!("Author: {} <{}>", commit.author.name, commit.author.email);
                let tree = repo.objects().read_tree(&commit.tree)?;
                let keys: Vec<&str> = tree.entries().iter().map(|e| e.name.as_str()).collect();
                println!("Keys:   {}", keys.join(", ").dimmed());
                println!("\n    {}\n", commit.message);
            }
            next = commit.first_parent();
            shown += 1;
        }
        Ok(())
    })
}

fn report(env: &Env, batch: Option<BatchRefUpdate>) {
    let Some(batch) = batch else {
        println!("Nothing to do.");
        return;
    };
    for (command, status) in batch.results() {
        let mark = match status {
            CommandStatus::Ok => "✓".green().bold(),
            CommandStatus::NotAttempted => "(dry run)".dimmed(),
            _ => "✗".red().bold(),
        };
        println!(
            "{} {} {} -> {}",
            mark,
            command.name,
            command.old.short_hex().dimmed(),
            command.new.short_hex().yellow()
        );
    }
    if env.dry_run {
        println!("No refs were moved.");
    }
}
