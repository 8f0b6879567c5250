//! BraLM CLI: generate text from an edge-graph model.
//!
//! Usage:
//!   bralm generate --vocab vocab.json --params model_0.json --params model_1.json --prompt "..."
//!   bralm init --vocab vocab.json --output model.json
//!   bralm init --text corpus.txt --vocab-out vocab.json --output model.json

use clap::{Parser, Subcommand};
use log::{error, info};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use bralm::config::{load_node_dict, node_dict_from_text};
use bralm::{
    BralmError, DecodeConfig, Device, EdgeModel, EdgeParameterStore, ExecutionContext,
    ModelConfig, VocabGraph,
};

#[derive(Parser)]
#[command(name = "bralm", version, about = "BraLM: edge-graph character language model")]
struct Cli {
    /// JSON model config (hidden_size, device, init_seed)
    #[arg(long, global = true)]
    config: Option<String>,
    /// Execution target, e.g. cpu or cuda:0 (overrides config)
    #[arg(long, global = true)]
    device: Option<String>,
    /// Hidden size (overrides config)
    #[arg(long, global = true)]
    hidden: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a continuation of a prompt and print it
    Generate {
        /// Dense vocabulary description: JSON object label -> index
        #[arg(long)]
        vocab: Option<String>,
        /// Sparse vocabulary: file of `source->target` lines
        #[arg(long, conflicts_with = "vocab")]
        edges: Option<String>,
        /// Parameter files, merged in order (later files win)
        #[arg(long = "params", required = true)]
        params: Vec<String>,
        /// Seed text, at least two characters
        #[arg(short, long)]
        prompt: String,
        /// Total length target; generates max_len - prompt length edges
        #[arg(long, default_value = "16", conflicts_with = "max_new_tokens")]
        max_len: usize,
        /// Number of edges to generate
        #[arg(short = 'n', long)]
        max_new_tokens: Option<usize>,
        /// Sample instead of taking the arg-max
        #[arg(long)]
        sample: bool,
        #[arg(long, default_value = "1.0")]
        temperature: f64,
        /// Random seed for sampling
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Write freshly initialised parameters for a vocabulary
    Init {
        /// Dense vocabulary description to initialise for
        #[arg(long, required_unless_present = "text")]
        vocab: Option<String>,
        /// Build the vocabulary from the distinct characters of this file
        #[arg(long, conflicts_with = "vocab")]
        text: Option<String>,
        /// Where to write the vocabulary built from --text
        #[arg(long, requires = "text")]
        vocab_out: Option<String>,
        /// Output parameter file; with --parts N, files get a `.K` suffix
        #[arg(short, long)]
        output: String,
        /// Split the parameters over this many files
        #[arg(long, default_value = "1")]
        parts: usize,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match model_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Generate {
            vocab, edges, params, prompt, max_len, max_new_tokens, sample, temperature, seed,
        } => {
            let max_new_tokens =
                max_new_tokens.unwrap_or_else(|| max_len.saturating_sub(prompt.chars().count()));
            let decode = DecodeConfig { max_new_tokens, do_sample: sample, temperature, seed };
            cmd_generate(&config, vocab.as_deref(), edges.as_deref(), &params, &prompt, &decode)
        }
        Commands::Init { vocab, text, vocab_out, output, parts } => {
            cmd_init(&config, vocab.as_deref(), text.as_deref(), vocab_out.as_deref(), &output, parts)
        }
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

fn model_config(cli: &Cli) -> Result<ModelConfig, BralmError> {
    let mut config = match &cli.config {
        Some(path) => ModelConfig::load(path)?,
        None => ModelConfig::default(),
    };
    if let Some(device) = &cli.device {
        config.device = device.parse::<Device>()?;
    }
    if let Some(hidden) = cli.hidden {
        config.hidden_size = hidden;
    }
    config.validate()?;
    Ok(config)
}

fn cmd_generate(
    config: &ModelConfig,
    vocab: Option<&str>,
    edges: Option<&str>,
    params: &[String],
    prompt: &str,
    decode: &DecodeConfig,
) -> Result<(), BralmError> {
    let model = match (vocab, edges) {
        (Some(vocab), _) => EdgeModel::load(vocab, params, config)?,
        (None, Some(edges)) => {
            let graph = VocabGraph::from_edge_file(edges)?;
            let ctx = ExecutionContext::new(config.device);
            let store = EdgeParameterStore::load(&graph, config.hidden_size, params, &ctx)?;
            EdgeModel::new(graph, store, ctx)?
        }
        (None, None) => {
            return Err(BralmError::InvalidVocabulary("pass --vocab or --edges".into()));
        }
    };

    info!(
        "decoding {} new edges from {:?} on {}",
        decode.max_new_tokens,
        prompt,
        model.context().device()
    );
    let result = model.generate(prompt, decode)?;
    info!("generated {:?} (avg energy {:.4})", result.continuation, result.avg_energy());
    println!("{}", result.text);
    Ok(())
}

fn cmd_init(
    config: &ModelConfig,
    vocab: Option<&str>,
    text: Option<&str>,
    vocab_out: Option<&str>,
    output: &str,
    parts: usize,
) -> Result<(), BralmError> {
    let dict = match (vocab, text) {
        (Some(path), _) => load_node_dict(path)?,
        (None, Some(path)) => {
            let dict = node_dict_from_text(&std::fs::read_to_string(path)?);
            if let Some(out) = vocab_out {
                std::fs::write(out, serde_json::to_string_pretty(&dict)?)?;
                info!("wrote {} nodes to {}", dict.len(), out);
            }
            dict
        }
        (None, None) => {
            return Err(BralmError::InvalidVocabulary("pass --vocab or --text".into()));
        }
    };

    let graph = VocabGraph::from_node_dict(&dict)?;
    let ctx = ExecutionContext::new(config.device);
    let mut rng = ChaCha8Rng::seed_from_u64(config.init_seed);
    let store = EdgeParameterStore::random(&graph, config.hidden_size, &ctx, &mut rng)?;

    let set = store.to_parameter_set();
    if parts <= 1 {
        set.save(output)?;
        info!("wrote {} edges to {}", graph.num_edges(), output);
    } else {
        for (k, part) in set.split(parts).into_iter().enumerate() {
            let path = format!("{output}.{k}");
            part.save(&path)?;
            info!("wrote part {} ({} edges) to {}", k, part.edges.len(), path);
        }
    }
    Ok(())
}
