use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use intent_grammar::{
    load_ini, load_slots_dir, load_word_set, read_automaton, ArtifactStore, Automaton,
    ExampleGenerator, FuzzyRecognizer, GrammarCompiler, Profile, Recognition, RecognitionConfig,
    Recognizer, StrictRecognizer, WordCasing, MERGED_FILE,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "ig",
    version,
    about = "Intent grammar compiler and recognizer",
    disable_help_subcommand = true
)]
struct Cli {
    /// Profile YAML supplying defaults for every command
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Casing {
    Ignore,
    Upper,
    Lower,
}

impl From<Casing> for WordCasing {
    fn from(casing: Casing) -> Self {
        match casing {
            Casing::Ignore => WordCasing::Ignore,
            Casing::Upper => WordCasing::Upper,
            Casing::Lower => WordCasing::Lower,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile sentence templates and slot lists into a recognizer
    Compile {
        /// Grammar file with one [Intent] section per intent
        #[arg(long)]
        sentences: Option<PathBuf>,
        /// Directory with one value file per slot
        #[arg(long)]
        slots: Option<PathBuf>,
        /// Output directory for compiled automata
        #[arg(long)]
        out: Option<PathBuf>,
        /// Case transform applied to template words
        #[arg(long, value_enum)]
        casing: Option<Casing>,
        /// Only compile these intents (repeatable)
        #[arg(long = "intent")]
        intents: Vec<String>,
    },
    /// Recognize intents in sentences (arguments or stdin lines)
    Recognize {
        /// Merged recognizer automaton
        #[arg(long)]
        fst: Option<PathBuf>,
        /// Tolerate extra words instead of requiring an exact match
        #[arg(long, action = ArgAction::SetTrue)]
        fuzzy: bool,
        /// Require an exact match, overriding the profile
        #[arg(long, action = ArgAction::SetTrue, conflicts_with = "fuzzy")]
        strict: bool,
        /// Stop word file (fuzzy only)
        #[arg(long)]
        stop_words: Option<PathBuf>,
        /// Skip words the grammar never uses (fuzzy only)
        #[arg(long, action = ArgAction::SetTrue)]
        skip_unknown: bool,
        /// Drop words the grammar never uses before matching (strict only)
        #[arg(long, action = ArgAction::SetTrue)]
        drop_unknown: bool,
        /// Case transform applied to input words
        #[arg(long, value_enum)]
        casing: Option<Casing>,
        /// Only report these intents (repeatable)
        #[arg(long = "intent-filter")]
        intent_filter: Vec<String>,
        /// Treat input lines as plain text instead of JSON objects
        #[arg(long, action = ArgAction::SetTrue)]
        text_input: bool,
        /// Sentences to recognize; stdin is read when none are given
        sentences: Vec<String>,
    },
    /// Generate labeled example sentences
    Generate {
        /// Merged recognizer automaton
        #[arg(long)]
        fst: Option<PathBuf>,
        /// Number of random examples; 0 lists every path
        #[arg(long, default_value_t = 10)]
        number: usize,
        /// Seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,
        /// Print IOB lines
        #[arg(long, action = ArgAction::SetTrue, conflicts_with = "raw_symbols")]
        iob: bool,
        /// Print the raw output symbols of each path
        #[arg(long, action = ArgAction::SetTrue)]
        raw_symbols: bool,
    },
    /// Print the words a recognizer can consume, one per line
    Vocab {
        /// Merged recognizer automaton
        #[arg(long)]
        fst: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let profile = match &cli.profile {
        Some(path) => Some(
            Profile::load(path).with_context(|| format!("loading profile {}", path.display()))?,
        ),
        None => None,
    };

    match cli.command {
        Commands::Compile {
            sentences,
            slots,
            out,
            casing,
            intents,
        } => compile(profile.as_ref(), sentences, slots, out, casing, intents),
        Commands::Recognize {
            fst,
            fuzzy,
            strict,
            stop_words,
            skip_unknown,
            drop_unknown,
            casing,
            intent_filter,
            text_input,
            sentences,
        } => {
            let options = RecognizeOptions {
                fuzzy,
                strict,
                stop_words,
                skip_unknown,
                drop_unknown,
                casing,
                intent_filter,
                text_input,
            };
            let fst = merged_path(profile.as_ref(), fst)?;
            recognize(profile.as_ref(), &fst, options, sentences)
        }
        Commands::Generate {
            fst,
            number,
            seed,
            iob,
            raw_symbols,
        } => {
            let fst = merged_path(profile.as_ref(), fst)?;
            generate(&fst, number, seed, iob, raw_symbols)
        }
        Commands::Vocab { fst } => {
            let fst = merged_path(profile.as_ref(), fst)?;
            vocab(&fst)
        }
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();
}

/// Explicit `--fst`, else the merged artifact in the profile's artifact directory
fn merged_path(profile: Option<&Profile>, fst: Option<PathBuf>) -> Result<PathBuf> {
    match (fst, profile) {
        (Some(path), _) => Ok(path),
        (None, Some(profile)) => Ok(profile.artifacts_dir().join(MERGED_FILE)),
        (None, None) => bail!("--fst or --profile is required"),
    }
}

fn load_fst(path: &Path) -> Result<Automaton> {
    read_automaton(path).with_context(|| format!("reading automaton {}", path.display()))
}

fn compile(
    profile: Option<&Profile>,
    sentences: Option<PathBuf>,
    slots: Option<PathBuf>,
    out: Option<PathBuf>,
    casing: Option<Casing>,
    intents: Vec<String>,
) -> Result<()> {
    let defaults = Profile::default();
    let profile = profile.unwrap_or(&defaults);
    let sentences = sentences.unwrap_or_else(|| profile.sentences_file());
    let slots_dir = slots.unwrap_or_else(|| profile.slots_dir());
    let out = out.unwrap_or_else(|| profile.artifacts_dir());
    let casing = casing.map_or(profile.training.word_casing, WordCasing::from);
    let whitelist: Option<BTreeSet<String>> = if intents.is_empty() {
        profile.intent_whitelist()
    } else {
        Some(intents.into_iter().collect())
    };

    let grammars = load_ini(&sentences, whitelist.as_ref())
        .with_context(|| format!("loading {}", sentences.display()))?;
    if grammars.is_empty() {
        warn!("No intents to compile in {}", sentences.display());
    }
    let slots = load_slots_dir(&slots_dir)
        .with_context(|| format!("loading slots from {}", slots_dir.display()))?;
    let store = ArtifactStore::open(&out)?;

    let compiled = GrammarCompiler::new()
        .with_casing(casing)
        .with_store(store.clone())
        .compile(&grammars, &slots)
        .context("compiling grammar")?;

    let vocab_path = out.join("vocab.txt");
    let mut vocab = String::new();
    for word in compiled.merged.input_vocabulary() {
        vocab.push_str(&word);
        vocab.push('\n');
    }
    fs::write(&vocab_path, vocab)
        .with_context(|| format!("writing {}", vocab_path.display()))?;

    info!(
        "Compiled {} intent(s), {} slot(s)",
        compiled.intents.len(),
        slots.len()
    );
    println!("{}", store.merged_path().display());
    Ok(())
}

#[derive(Debug)]
struct RecognizeOptions {
    fuzzy: bool,
    strict: bool,
    stop_words: Option<PathBuf>,
    skip_unknown: bool,
    drop_unknown: bool,
    casing: Option<Casing>,
    intent_filter: Vec<String>,
    text_input: bool,
}

/// Command-line flags win over the profile; without either, match strictly
fn use_fuzzy(options: &RecognizeOptions, recognition: Option<&RecognitionConfig>) -> bool {
    if options.strict {
        false
    } else {
        options.fuzzy || recognition.is_some_and(|r| r.fuzzy)
    }
}

fn recognize(
    profile: Option<&Profile>,
    fst_path: &Path,
    options: RecognizeOptions,
    sentences: Vec<String>,
) -> Result<()> {
    let fst = load_fst(fst_path)?;
    let recognition = profile.map(|p| &p.recognition);
    let casing = match (options.casing, profile) {
        (Some(casing), _) => casing.into(),
        (None, Some(profile)) => profile.training.word_casing,
        (None, None) => WordCasing::Ignore,
    };
    let intent_filter: Option<BTreeSet<String>> = if options.intent_filter.is_empty() {
        profile.and_then(Profile::intent_filter)
    } else {
        Some(options.intent_filter.iter().cloned().collect())
    };

    let recognizer: Box<dyn Recognizer> = if use_fuzzy(&options, recognition) {
        let stop_words = match (&options.stop_words, profile) {
            (Some(path), _) => load_word_set(path),
            (None, Some(profile)) => profile.stop_words(),
            (None, None) => BTreeSet::new(),
        };
        let skip_unknown = options.skip_unknown || recognition.is_some_and(|r| r.skip_unknown);
        let known = Some(fst.input_vocabulary());
        Box::new(
            FuzzyRecognizer::new(fst)
                .context("preparing fuzzy recognizer")?
                .with_stop_words(stop_words)
                .with_known_tokens(known)
                .with_skip_unknown(skip_unknown)
                .with_intent_filter(intent_filter),
        )
    } else {
        let drop_unknown = options.drop_unknown || recognition.is_some_and(|r| r.drop_unknown);
        Box::new(
            StrictRecognizer::new(fst)
                .with_drop_unknown(drop_unknown)
                .with_intent_filter(intent_filter),
        )
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut handle = |line: &str| -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let (text, input) = split_input(line, options.text_input);
        let result = recognizer.recognize(&casing.tokenize(&text));
        writeln!(out, "{}", render(result, input)?)?;
        out.flush()?;
        Ok(())
    };

    if sentences.is_empty() {
        for line in io::stdin().lock().lines() {
            handle(&line?)?;
        }
    } else {
        for sentence in &sentences {
            handle(sentence)?;
        }
    }
    Ok(())
}

/// Text to recognize plus the JSON object it came in, if any
fn split_input(line: &str, text_input: bool) -> (String, Option<Map<String, Value>>) {
    if !text_input {
        if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(line) {
            let text = object
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return (text, Some(object));
        }
    }
    (line.to_string(), None)
}

/// The recognition as JSON, merged over the input object's other fields
fn render(result: Recognition, input: Option<Map<String, Value>>) -> Result<String> {
    let Value::Object(fields) = serde_json::to_value(&result)? else {
        bail!("recognition did not serialize to an object");
    };
    let mut merged = input.unwrap_or_default();
    merged.extend(fields);
    Ok(serde_json::to_string(&Value::Object(merged))?)
}

fn generate(
    fst_path: &Path,
    number: usize,
    seed: Option<u64>,
    iob: bool,
    raw_symbols: bool,
) -> Result<()> {
    let fst = load_fst(fst_path)?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let examples = ExampleGenerator::new(&fst)
        .generate(number, &mut rng)
        .context("generating examples")?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for example in &examples {
        if iob {
            writeln!(out, "{}", example.to_iob())?;
        } else if raw_symbols {
            writeln!(out, "{}", example.raw_symbols())?;
        } else {
            writeln!(out, "{}", serde_json::to_string(&example.intent)?)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn vocab(fst_path: &Path) -> Result<()> {
    let fst = load_fst(fst_path)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for word in fst.input_vocabulary() {
        writeln!(out, "{word}")?;
    }
    out.flush()?;
    Ok(())
}
