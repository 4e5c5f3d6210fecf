// 🔵 circle-cred - CLI over the allocation pipeline
//
// Data goes to stdout (or --out), status and logs go to stderr.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use circle_cred::{
    build_graph, distribute, load_gifts, process_sheet, ranking_input, tableize, total_paid,
    write_edges_csv, write_grid_csv, write_json, write_nodes_csv, write_payouts_csv,
    AddressBook, Config, CsvGridSource, GridSource, LeafPolicy, ProcessedSheet, WeightPolicy,
};

#[derive(Parser)]
#[command(name = "circle-cred", version)]
#[command(about = "Multi-level allocation sheets → weighted contribution graphs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve sheets and print the allocation trees as JSON
    Tree {
        #[command(flatten)]
        inputs: Inputs,
    },

    /// Compile sheets into one graph plus identity proposals (JSON)
    Graph {
        #[command(flatten)]
        inputs: Inputs,

        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Write the compiled graph as nodes/edges CSV
    Export {
        #[command(flatten)]
        inputs: Inputs,

        #[arg(long, default_value = "nodes.csv")]
        nodes: PathBuf,

        #[arg(long, default_value = "edges.csv")]
        edges: PathBuf,
    },

    /// Split an amount down one sheet's tree; prints name,address,amount CSV
    Payout {
        #[command(flatten)]
        inputs: Inputs,

        /// Amount to distribute
        #[arg(short, long)]
        amount: f64,

        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Turn a sender,recipient,tokens gift list into a grid block CSV
    Tableize {
        /// Gifts CSV
        #[arg(long)]
        gifts: PathBuf,

        /// Block name for the header cell
        #[arg(short, long)]
        circle: String,

        #[arg(short, long)]
        out: PathBuf,
    },
}

#[derive(Args)]
struct Inputs {
    /// Sheet exported as CSV (repeat for several periods)
    #[arg(short, long = "grid", required = true)]
    grids: Vec<PathBuf>,

    /// Range label, e.g. "'March 2022'!A1:Z100" (single grid only; default: file stem)
    #[arg(long)]
    range: Option<String>,

    /// name,address CSV overlay
    #[arg(long)]
    addresses: Option<PathBuf>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Edge weighting: flow | probability
    #[arg(long)]
    policy: Option<WeightPolicy>,

    /// Reject leaf names that are neither actors nor in the address overlay
    #[arg(long)]
    known_only: bool,
}

impl Inputs {
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if self.known_only {
            config.leaf_policy = LeafPolicy::KnownOnly;
        }
        Ok(config)
    }

    fn load(&self, config: &Config) -> Result<Vec<ProcessedSheet>> {
        if self.range.is_some() && self.grids.len() > 1 {
            anyhow::bail!("--range can only be used with a single --grid");
        }

        let overlay = match &self.addresses {
            Some(path) => AddressBook::from_csv(path)?,
            None => AddressBook::new(),
        };

        let mut sheets = Vec::with_capacity(self.grids.len());
        for path in &self.grids {
            let mut source = CsvGridSource::new(path);
            if let Some(range) = &self.range {
                source = source.with_range_label(range.clone());
            }

            let values = source.fetch()?;
            let sheet = process_sheet(&values, &overlay, config.leaf_policy)
                .with_context(|| format!("Failed to process sheet {}", source.path().display()))?;

            eprintln!(
                "✓ {} ({}): {} blocks, {} orphaned",
                sheet.title,
                sheet.period,
                sheet.tree.blocks.len(),
                sheet.orphans.len()
            );
            sheets.push(sheet);
        }

        Ok(sheets)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Tree { inputs } => run_tree(&inputs),
        Command::Graph { inputs, out } => run_graph(&inputs, out.as_deref()),
        Command::Export { inputs, nodes, edges } => run_export(&inputs, &nodes, &edges),
        Command::Payout { inputs, amount, out } => run_payout(&inputs, amount, out.as_deref()),
        Command::Tableize { gifts, circle, out } => run_tableize(&gifts, &circle, &out),
    }
}

fn run_tree(inputs: &Inputs) -> Result<()> {
    let config = inputs.config()?;
    let sheets = inputs.load(&config)?;

    let trees: Vec<serde_json::Value> = sheets
        .iter()
        .map(|sheet| {
            serde_json::json!({
                "title": sheet.title,
                "period": sheet.period,
                "fingerprint": sheet.fingerprint,
                "tree": sheet.tree,
                "orphans": sheet.orphans,
            })
        })
        .collect();

    write_json(&trees, io::stdout().lock())
}

fn run_graph(inputs: &Inputs, out: Option<&Path>) -> Result<()> {
    let config = inputs.config()?;
    let sheets = inputs.load(&config)?;
    let input = ranking_input(&sheets, &config.compiler(), &config.plugin_name)?;

    eprintln!(
        "✓ Graph: {} nodes, {} edges, {} identities ({} policy)",
        input.graph.node_count(),
        input.graph.edge_count(),
        input.identities.len(),
        config.policy
    );

    match out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            write_json(&input, file)
        }
        None => write_json(&input, io::stdout().lock()),
    }
}

fn run_export(inputs: &Inputs, nodes: &Path, edges: &Path) -> Result<()> {
    let config = inputs.config()?;
    let sheets = inputs.load(&config)?;
    let graph = build_graph(&sheets, &config.compiler())?;

    write_nodes_csv(&graph, nodes)?;
    write_edges_csv(&graph, edges)?;

    eprintln!("✓ Wrote {} nodes to {}", graph.node_count(), nodes.display());
    eprintln!("✓ Wrote {} edges to {}", graph.edge_count(), edges.display());
    Ok(())
}

fn run_payout(inputs: &Inputs, amount: f64, out: Option<&Path>) -> Result<()> {
    if inputs.grids.len() != 1 {
        anyhow::bail!("payout works on exactly one --grid");
    }

    let config = inputs.config()?;
    let sheets = inputs.load(&config)?;
    let Some(sheet) = sheets.first() else {
        anyhow::bail!("no sheet loaded");
    };

    let payouts = distribute(&sheet.tree, amount)
        .with_context(|| format!("Failed to distribute {} over {}", amount, sheet.title))?;

    eprintln!(
        "✓ {} recipients, {:.4} distributed",
        payouts.len(),
        total_paid(&payouts)
    );

    match out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            write_payouts_csv(&payouts, file)
        }
        None => write_payouts_csv(&payouts, io::stdout().lock()),
    }
}

fn run_tableize(gifts_path: &Path, circle: &str, out: &Path) -> Result<()> {
    let gifts = load_gifts(gifts_path)?;
    let grid = tableize(circle, &gifts);
    write_grid_csv(&grid, out)?;

    eprintln!(
        "✓ {} gifts → {} rows in {}",
        gifts.len(),
        grid.len(),
        out.display()
    );
    Ok(())
}
