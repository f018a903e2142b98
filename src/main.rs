use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use metaview::db::store::snapshot_stats;
use metaview::db::{migrate, Db};
use metaview::graph::views::PresetView;
use metaview::graph::{ProjectTimeline, TimelineEntry};
use metaview::render::render_outline;
use metaview::repository::TraversalDirection;
use metaview::{
    build_context_path, build_graph_with_cancel, build_hierarchy_with_cancel, AssembledGraph, CancelSignal, Config,
    ContextPath, DiagramRenderer, ExpansionPolicy, GraphAssembler, MetaviewError, RelationshipGroup, SqliteRepository,
    ViewPreset,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "metaview")]
#[command(about = "Assemble hierarchies, graphs and context paths from a metadata snapshot")]
#[command(version)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Mermaid,
    Outline,
    Gantt,
}

/// Traversal flags shared by the assembling commands
#[derive(clap::Args, Debug)]
struct Traversal {
    /// Maximum depth (defaults to assembly.default_max_depth)
    #[arg(short, long)]
    depth: Option<usize>,

    /// strict-tree or dag-with-sharing (defaults to assembly.default_policy)
    #[arg(short, long)]
    policy: Option<ExpansionPolicy>,

    /// Stop expanding after this many milliseconds and return what was assembled
    #[arg(long)]
    deadline_ms: Option<u64>,
}

impl Traversal {
    /// Deadline signal, if one was asked for.
    fn cancel(&self) -> Option<CancelSignal> {
        self.deadline_ms.map(|ms| CancelSignal::after(Duration::from_millis(ms)))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply migrations and check the snapshot schema
    Verify,

    /// Same-kind tree through the given relationship types
    Hierarchy {
        guid: String,
        #[arg(short = 't', long = "type", required = true)]
        types: Vec<String>,
        #[command(flatten)]
        traversal: Traversal,
    },

    /// Tree through the first group, other groups as links
    Graph {
        guid: String,
        /// name=Type1,Type2[@outgoing|incoming|both]; the first group is primary
        #[arg(short, long = "group", required = true)]
        groups: Vec<String>,
        #[command(flatten)]
        traversal: Traversal,
    },

    /// Chain of containers above an element
    ContextPath {
        guid: String,
        #[arg(short = 't', long = "type", required = true)]
        types: Vec<String>,
        #[arg(short, long)]
        depth: Option<usize>,
    },

    /// Named view configuration
    Preset {
        preset: ViewPreset,
        guid: String,
        #[command(flatten)]
        traversal: Traversal,
    },

    /// Dated projects under a project hierarchy
    Timeline {
        guid: String,
        #[command(flatten)]
        traversal: Traversal,
    },
}

/// Parse `name=Type1,Type2[@direction]`.
fn parse_group(arg: &str) -> Result<RelationshipGroup> {
    let (name, rest) = arg
        .split_once('=')
        .with_context(|| format!("group {:?} must look like name=Type1,Type2", arg))?;
    let (types, direction) = match rest.split_once('@') {
        Some((types, direction)) => (types, Some(direction.parse::<TraversalDirection>()?)),
        None => (rest, None),
    };
    let types: Vec<&str> = types.split(',').map(str::trim).filter(|t| !t.is_empty()).collect();
    if types.is_empty() {
        bail!("group {:?} names no relationship types", name);
    }
    let group = RelationshipGroup::new(name.trim(), &types);
    Ok(match direction {
        Some(direction) => group.direction(direction),
        None => group,
    })
}

struct App {
    config: Config,
    assembler: GraphAssembler,
    renderer: DiagramRenderer,
}

impl App {
    async fn open(config: Config) -> Result<Self> {
        let repository = SqliteRepository::open(config.db_path().to_path_buf(), config.migrations_dir())
            .await
            .with_context(|| format!("Failed to open snapshot {}", config.db_path().display()))?;
        let assembler = GraphAssembler::new(Arc::new(repository))
            .with_registry(config.registry())
            .with_options(config.assembly_options());
        let renderer = DiagramRenderer::new(config.render_options());
        Ok(Self {
            config,
            assembler,
            renderer,
        })
    }

    fn depth(&self, traversal: &Traversal) -> usize {
        traversal.depth.unwrap_or(self.config.assembly.default_max_depth)
    }

    fn policy(&self, traversal: &Traversal) -> ExpansionPolicy {
        traversal.policy.unwrap_or(self.config.assembly.default_policy)
    }

    async fn hierarchy(&self, guid: &str, types: &[String], traversal: &Traversal) -> Result<AssembledGraph> {
        let cancel = traversal.cancel().unwrap_or_else(CancelSignal::none);
        let depth = self.depth(traversal);
        Ok(build_hierarchy_with_cancel(&self.assembler, guid, types, depth, self.policy(traversal), &cancel).await?)
    }

    async fn graph(&self, guid: &str, groups: Vec<RelationshipGroup>, traversal: &Traversal) -> Result<AssembledGraph> {
        let cancel = traversal.cancel().unwrap_or_else(CancelSignal::none);
        let depth = self.depth(traversal);
        Ok(build_graph_with_cancel(&self.assembler, guid, groups, depth, self.policy(traversal), &cancel).await?)
    }

    async fn preset(&self, preset: ViewPreset, guid: &str, traversal: &Traversal) -> Result<PresetView> {
        let cancel = traversal.cancel();
        let view = preset
            .build_with_cancel(&self.assembler, guid, self.depth(traversal), self.policy(traversal), cancel.as_ref())
            .await
            .with_context(|| format!("Failed to build the {} preset for {}", preset, guid))?;
        Ok(view)
    }

    fn print_graph(&self, graph: &AssembledGraph, format: OutputFormat) -> Result<()> {
        if graph.partial_result_warning() {
            log::warn!("Result is incomplete: {:?}", graph.completeness);
        }
        match format {
            OutputFormat::Json => println!("{}", graph.to_json()?),
            OutputFormat::Mermaid => {
                let source = self.renderer.render(graph);
                log::info!("Diagram digest: {}", source.digest);
                print!("{}", source);
            }
            OutputFormat::Outline => print!("{}", render_outline(graph)),
            OutputFormat::Gantt => bail!("gantt output is only available for the timeline command"),
        }
        Ok(())
    }

    fn print_context_path(&self, path: &ContextPath, format: OutputFormat) -> Result<()> {
        if path.partial {
            log::warn!("Context path is incomplete");
        }
        match format {
            OutputFormat::Json => println!("{}", path.to_json()?),
            OutputFormat::Mermaid => print!("{}", self.renderer.render_context_path(path)),
            OutputFormat::Outline => {
                for (depth, element) in std::iter::once(&path.leaf).chain(&path.ancestors).enumerate() {
                    println!("{}{} [{}] {}", "  ".repeat(depth), element.label(), element.properties.kind(), element.guid());
                }
                if path.depth_exceeded {
                    println!("(more containers above)");
                }
            }
            OutputFormat::Gantt => bail!("gantt output is only available for the timeline command"),
        }
        Ok(())
    }

    fn print_timeline(&self, timeline: &ProjectTimeline, format: OutputFormat) -> Result<()> {
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(timeline)?),
            OutputFormat::Gantt | OutputFormat::Mermaid => print!("{}", self.renderer.render_gantt(timeline)),
            OutputFormat::Outline => {
                let line = |entry: &TimelineEntry| {
                    let dates = match (entry.start, entry.planned_end) {
                        (Some(start), Some(end)) => format!("{} .. {}", start.date_naive(), end.date_naive()),
                        (Some(start), None) => format!("{} ..", start.date_naive()),
                        _ => "undated".to_string(),
                    };
                    println!("{}{} ({})", "  ".repeat(entry.depth), entry.name, dates);
                };
                timeline.entries.iter().chain(&timeline.undated).for_each(line);
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.metaview.log_level.as_str()),
    )
    .init();

    let format = cli.format;
    let app = App::open(config).await?;
    match cli.command.unwrap_or(Command::Verify) {
        Command::Verify => run_schema_verification(&app).await?,
        Command::Hierarchy { guid, types, traversal } => {
            let graph = app.hierarchy(&guid, &types, &traversal).await?;
            app.print_graph(&graph, format)?;
        }
        Command::Graph { guid, groups, traversal } => {
            let groups = groups.iter().map(|g| parse_group(g)).collect::<Result<Vec<_>>>()?;
            let graph = app.graph(&guid, groups, &traversal).await?;
            app.print_graph(&graph, format)?;
        }
        Command::ContextPath { guid, types, depth } => {
            let depth = depth.unwrap_or(app.config.assembly.default_max_depth);
            let path = build_context_path(&app.assembler, &guid, &types, depth).await?;
            app.print_context_path(&path, format)?;
        }
        Command::Preset { preset, guid, traversal } => match app.preset(preset, &guid, &traversal).await? {
            PresetView::ContextPath(path) => app.print_context_path(&path, format)?,
            PresetView::Graph(graph) => app.print_graph(&graph, format)?,
        },
        Command::Timeline { guid, traversal } => {
            let graph = app.graph(&guid, ViewPreset::ProjectHierarchy.groups(), &traversal).await?;
            let timeline = ProjectTimeline::from_graph(&graph);
            if timeline.is_empty() {
                log::warn!("No projects found under {}", guid);
            }
            app.print_timeline(&timeline, format)?;
        }
    }
    Ok(())
}

/// Verify that all expected database objects exist
async fn run_schema_verification(app: &App) -> Result<()> {
    log::info!("Starting metaview v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Database path: {}", app.config.db_path().display());

    let db = Db::new(app.config.db_path());
    db.with_connection(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        for table in ["elements", "relationships", "schema_migrations"] {
            if !tables.iter().any(|t| t == table) {
                return Err(MetaviewError::Config(format!("Missing table: {}", table)));
            }
            log::debug!("✓ Table exists: {}", table);
        }

        let applied = migrate::get_applied_migrations(conn)?;
        log::debug!("✓ {} migrations applied", applied.len());

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            return Err(MetaviewError::Config(format!("Journal mode is not WAL: {}", journal_mode)));
        }

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(MetaviewError::Config(format!("Database integrity check failed: {}", integrity)));
        }
        log::info!("✓ Database integrity: OK");
        Ok(())
    })
    .await?;

    let stats = snapshot_stats(&db).await?;
    println!(
        "elements: {}, relationships: {}, dangling relationships: {}",
        stats.elements, stats.relationships, stats.dangling
    );
    if stats.dangling > 0 {
        log::warn!("{} relationships point at elements missing from the snapshot", stats.dangling);
    }
    Ok(())
}
