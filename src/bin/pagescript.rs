use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use pagescript::config::Config;
use pagescript::params::ParamPair;
use pagescript::{
    HeadlessBrowser, JsonFileStorage, LogView, PanelController, ScriptId, ScriptStorage,
    TabOptions, runtime_channel,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

#[derive(Parser)]
#[command(name = "pagescript", about = "Store script snippets and run them in a page")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Script storage file (overrides configuration)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List stored scripts
    List,
    /// Create a script, or overwrite it when --id names an existing one
    Save {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: String,
        #[arg(long, conflicts_with = "code_file")]
        code: Option<String>,
        #[arg(long)]
        code_file: Option<PathBuf>,
        #[arg(long, default_value = "")]
        url_pattern: String,
        /// Parameter as key=value; repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<ParamPair>,
    },
    /// Delete a stored script
    Delete { id: String },
    /// Run a stored script in a fresh headless tab
    Run {
        /// Script id or name
        script: String,
        /// URL of the page to open
        #[arg(long)]
        url: String,
        /// Open the page without the content bridge attached
        #[arg(long)]
        no_bridge: bool,
    },
}

fn parse_param(raw: &str) -> Result<ParamPair, String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    Ok(ParamPair::new(key, value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = cli.storage {
        config.storage.path = path;
    }
    pagescript::init_tracing(&config.logging);

    let storage = JsonFileStorage::new(&config.storage.path);
    match cli.command {
        Command::List => list(&storage).await,
        Command::Save {
            id,
            name,
            code,
            code_file,
            url_pattern,
            params,
        } => {
            let code = match (code, code_file) {
                (Some(code), _) => code,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => String::new(),
            };
            save(&config, storage, id, name, code, url_pattern, params).await
        }
        Command::Delete { id } => delete(&config, storage, id).await,
        Command::Run {
            script,
            url,
            no_bridge,
        } => run(&config, storage, &script, &url, !no_bridge).await,
    }
}

async fn list(storage: &JsonFileStorage) -> anyhow::Result<()> {
    let scripts = storage.load().await?;
    if scripts.is_empty() {
        println!("no scripts stored in {}", storage.path().display());
    }
    for (id, record) in scripts.iter() {
        if record.url_pattern.is_empty() {
            println!("{}\t{}", id, record.name);
        } else {
            println!("{}\t{}\t{}", id, record.name, record.url_pattern);
        }
    }
    Ok(())
}

fn print_console(console: &LogView) {
    for entry in console.entries() {
        println!("{:<7} {}", entry.level, entry.render());
    }
}

/// A panel whose browser has no tabs; enough for script management.
async fn management_panel(
    config: &Config,
    storage: JsonFileStorage,
) -> anyhow::Result<PanelController<JsonFileStorage, HeadlessBrowser>> {
    let (port, _inbox) = runtime_channel();
    let browser = HeadlessBrowser::new(port, config.page.clone());
    let mut panel = PanelController::new(storage, browser, LogView::new(config.console.max_entries));
    panel.load_scripts().await?;
    Ok(panel)
}

async fn save(
    config: &Config,
    storage: JsonFileStorage,
    id: Option<String>,
    name: String,
    code: String,
    url_pattern: String,
    params: Vec<ParamPair>,
) -> anyhow::Result<()> {
    let mut panel = management_panel(config, storage).await?;
    if let Some(id) = id {
        let id = ScriptId::from(id);
        if panel.select_script(Some(&id)).is_err() {
            bail!("no script with id {}", id);
        }
    }

    let draft = &mut panel.session_mut().draft;
    draft.name = name;
    draft.code = code;
    draft.url_pattern = url_pattern;
    draft.params = params;

    let result = panel.save_script().await;
    print_console(panel.console());
    let id = result?;
    println!("{}", id);
    Ok(())
}

async fn delete(config: &Config, storage: JsonFileStorage, id: String) -> anyhow::Result<()> {
    let mut panel = management_panel(config, storage).await?;
    let id = ScriptId::from(id);
    panel.select_script(Some(&id))?;
    let removed = panel.delete_script(|_| true).await;
    print_console(panel.console());
    if removed?.is_none() {
        bail!("nothing deleted");
    }
    Ok(())
}

async fn run(
    config: &Config,
    storage: JsonFileStorage,
    script: &str,
    url: &str,
    with_bridge: bool,
) -> anyhow::Result<()> {
    let url = url::Url::parse(url).with_context(|| format!("invalid page URL '{}'", url))?;

    let (port, mut inbox) = runtime_channel();
    let browser = HeadlessBrowser::new(port, config.page.clone());
    browser.open_tab(
        url.as_str(),
        TabOptions {
            with_bridge,
            ..Default::default()
        },
    )?;

    let mut panel = PanelController::new(storage, browser, LogView::new(config.console.max_entries));
    panel.load_scripts().await?;

    let id = {
        let scripts = &panel.session().scripts;
        let by_id = ScriptId::from(script);
        if scripts.contains(&by_id) {
            by_id
        } else if let Some((id, _)) = scripts.find_by_name(script) {
            id.clone()
        } else {
            bail!("no script with id or name '{}'", script);
        }
    };
    panel.select_script(Some(&id))?;

    let outcome = panel.run_script().await;

    // Console output trails the injection by one relay hop
    while let Ok(Some(message)) =
        tokio::time::timeout(Duration::from_millis(200), inbox.recv()).await
    {
        panel.handle_runtime_message(&message);
    }
    debug!("relay quiet, printing console");

    print_console(panel.console());
    outcome?;
    Ok(())
}
