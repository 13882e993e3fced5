use clap::{Args, Parser, Subcommand};
use skm_audio::bias_variance::{describe_dataset, fit_fold_codebooks};
use skm_audio::classifier::{classifier_dir, evaluate, train};
use skm_audio::collate::{slicing_pipeline, training_pipeline};
use skm_audio::config;
use skm_audio::dataset::discover_metadata;
use skm_audio::loader::materialize;
use skm_audio::report::{
    elbow_plot_path, format_summary, plot_elbow_curves, write_report, SweepReport,
};
use skm_audio::skm::{load_codebooks, save_codebooks};
use skm_audio::{
    infer_single, run_sweep, ExperimentConfig, FoldGenerator, InferenceConfig, KRange,
    PcaSvcPipeline, SweepMode, SweepOptions, Validate,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Spherical k-means codebook features with PCA + SVM evaluation
#[derive(Parser)]
#[command(name = "skm-audio")]
#[command(about = "Learn spherical k-means codebooks on audio and evaluate them with PCA + SVM")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Configuration sources: a bundled experiment file, overridden section by
/// section by per-concern files
#[derive(Args, Debug, Clone, Default)]
struct ConfigArgs {
    /// Experiment configuration with every section
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    dataset_config: Option<PathBuf>,

    #[arg(long)]
    spec_config: Option<PathBuf>,

    #[arg(long)]
    reshape_config: Option<PathBuf>,

    #[arg(long)]
    augment_config: Option<PathBuf>,

    #[arg(long)]
    skm_config: Option<PathBuf>,

    #[arg(long)]
    pca_config: Option<PathBuf>,

    #[arg(long)]
    svc_config: Option<PathBuf>,

    #[arg(long)]
    loader_config: Option<PathBuf>,

    #[arg(long)]
    pool_config: Option<PathBuf>,

    /// Dataset root, overrides the dataset configuration
    #[arg(long)]
    data: Option<PathBuf>,
}

/// How to pick k per class
#[derive(Args, Debug, Clone)]
struct KArgs {
    /// Fixed k per class, in label order (e.g. `--k 8 --k 8`)
    #[arg(long = "k", conflicts_with = "k_range")]
    k_vals: Vec<usize>,

    /// Elbow search range `min max step`
    #[arg(long, num_args = 3, value_names = ["MIN", "MAX", "STEP"])]
    k_range: Option<Vec<usize>>,
}

impl KArgs {
    fn mode(&self) -> anyhow::Result<SweepMode> {
        match &self.k_range {
            Some(r) => Ok(SweepMode::Search(KRange::new(r[0], r[1], r[2])?)),
            None if !self.k_vals.is_empty() => Ok(SweepMode::Fixed(self.k_vals.clone())),
            None => anyhow::bail!("either --k or --k-range is required"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fit and save the class codebooks of one fold
    FitCodebooks {
        #[command(flatten)]
        configs: ConfigArgs,

        #[command(flatten)]
        k: KArgs,

        /// Validation fold
        #[arg(long, default_value_t = 0)]
        fold: usize,

        /// Output directory for models
        #[arg(short, long, default_value = "./models")]
        output: PathBuf,

        /// Also plot elbow curves (elbow search only)
        #[arg(long)]
        plot: bool,
    },
    /// Train and validate the classifier of one fold on saved codebooks
    Train {
        #[command(flatten)]
        configs: ConfigArgs,

        #[arg(long, default_value_t = 0)]
        fold: usize,

        /// Directory holding the fold codebooks; the classifier is saved there too
        #[arg(short, long, default_value = "./models")]
        models: PathBuf,
    },
    /// Run codebook fitting and classification over every fold
    BiasVariance {
        #[command(flatten)]
        configs: ConfigArgs,

        #[command(flatten)]
        k: KArgs,

        /// Restrict the sweep to these folds
        #[arg(long)]
        folds: Vec<usize>,

        /// Audio file classified after every fold; its class 0 confidence
        /// is the fold's test value
        #[arg(long)]
        test_audio: Option<PathBuf>,

        /// Test set with the class-directory layout
        #[arg(long)]
        test_data: Option<PathBuf>,

        #[arg(short, long, default_value = "./sweep")]
        output: PathBuf,

        /// Plot elbow curves (elbow search only)
        #[arg(long)]
        plot: bool,
    },
    /// Classify one audio file with the models of a fold
    Infer {
        input: PathBuf,

        #[command(flatten)]
        configs: ConfigArgs,

        #[arg(short, long, default_value = "./models")]
        models: PathBuf,

        #[arg(long, default_value_t = 0)]
        fold: usize,
    },
    /// Validate an experiment configuration file
    ValidateConfig {
        config: PathBuf,
    },
    /// Show default configuration
    ShowConfig {
        /// Write it to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_experiment(args: &ConfigArgs) -> anyhow::Result<ExperimentConfig> {
    let mut experiment: ExperimentConfig = config::load_or_default(args.config.as_ref())?;
    if let Some(p) = &args.dataset_config {
        experiment.dataset = config::load_config(p)?;
    }
    if let Some(p) = &args.spec_config {
        experiment.spec = config::load_config(p)?;
    }
    if let Some(p) = &args.reshape_config {
        experiment.reshape = config::load_config(p)?;
    }
    if let Some(p) = &args.augment_config {
        experiment.augment = config::load_config(p)?;
    }
    if let Some(p) = &args.skm_config {
        experiment.skm = config::load_config(p)?;
    }
    if let Some(p) = &args.pca_config {
        experiment.pca = config::load_config(p)?;
    }
    if let Some(p) = &args.svc_config {
        experiment.svc = config::load_config(p)?;
    }
    if let Some(p) = &args.loader_config {
        experiment.loader = config::load_config(p)?;
    }
    if let Some(p) = &args.pool_config {
        experiment.pool = config::load_config(p)?;
    }
    if let Some(root) = &args.data {
        experiment.dataset.root_path = root.clone();
    }
    experiment.validate()?;
    Ok(experiment)
}

fn fold_generator(experiment: &ExperimentConfig) -> anyhow::Result<FoldGenerator> {
    let metadata = discover_metadata(&experiment.dataset)?;
    Ok(FoldGenerator::new(metadata, &experiment.dataset)?)
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn fit_codebooks(
    experiment: &ExperimentConfig,
    mode: &SweepMode,
    fold: usize,
    output: &Path,
    plot: bool,
) -> anyhow::Result<()> {
    let generator = fold_generator(experiment)?;
    let (train_set, _) = generator.fold(fold)?;
    let slicer = slicing_pipeline(Some(&experiment.augment), &experiment.spec, &experiment.reshape);
    let sliced = materialize(
        &train_set,
        &slicer,
        experiment.spec.sample_rate(),
        &experiment.loader,
    )?;
    let (codebooks, searches) = fit_fold_codebooks(&sliced, mode, experiment)?;
    save_codebooks(&codebooks, output, fold)?;

    for (label, search) in &searches {
        println!("class {}: k = {}", label, search.k_val());
    }
    if let (true, SweepMode::Search(range)) = (plot, mode) {
        for (label, search) in &searches {
            if search.scores().is_empty() {
                continue;
            }
            let path = elbow_plot_path(output, fold, *label);
            let chosen = usize::try_from(search.k_val()).ok();
            skm_audio::report::plot_elbow_curve(
                range,
                search.scores(),
                chosen,
                &format!("fold {} class {}", fold, label),
                &path,
            )?;
        }
    }
    println!(
        "Saved {} codebooks for fold {} to {}",
        codebooks.len(),
        fold,
        output.display()
    );
    Ok(())
}

fn train_fold(experiment: &ExperimentConfig, fold: usize, models: &Path) -> anyhow::Result<()> {
    let generator = fold_generator(experiment)?;
    let (train_set, val_set) = generator.fold(fold)?;
    let codebooks = load_codebooks(models, fold, experiment.dataset.n_classes)?;

    let pipeline = training_pipeline(
        &experiment.augment,
        &experiment.spec,
        &experiment.reshape,
        Arc::new(codebooks.clone()),
        &experiment.pool,
    );
    let items = materialize(
        &train_set,
        &pipeline,
        experiment.spec.sample_rate(),
        &experiment.loader,
    )?;
    let (features, labels) = skm_audio::collate::stack_rows(&items)?;
    let (classifier, train_acc) =
        train(features.view(), &labels, &experiment.pca, &experiment.svc)?;

    let (val_features, val_labels) = describe_dataset(&val_set, &codebooks, experiment)?;
    let val_acc = evaluate(&classifier, val_features.view(), &val_labels)?;
    classifier.save(&classifier_dir(models, fold))?;

    println!(
        "fold {}: train accuracy {:.3}, validation accuracy {:.3}",
        fold, train_acc, val_acc
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.verbose && cli.quiet {
        anyhow::bail!("Cannot specify both --verbose and --quiet");
    }
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::FitCodebooks {
            configs,
            k,
            fold,
            output,
            plot,
        } => {
            let experiment = load_experiment(&configs)?;
            fit_codebooks(&experiment, &k.mode()?, fold, &output, plot)?;
        }
        Commands::Train {
            configs,
            fold,
            models,
        } => {
            let experiment = load_experiment(&configs)?;
            train_fold(&experiment, fold, &models)?;
        }
        Commands::BiasVariance {
            configs,
            k,
            folds,
            test_audio,
            test_data,
            output,
            plot,
        } => {
            let experiment = load_experiment(&configs)?;
            let mode = k.mode()?;
            let generator = fold_generator(&experiment)?;

            let test_set = match test_data {
                Some(root) => {
                    let mut test_config = experiment.dataset.clone();
                    test_config.root_path = root;
                    test_config.layout = skm_audio::config::DatasetLayout::KFold;
                    let metadata = discover_metadata(&test_config)?;
                    Some(skm_audio::Dataset {
                        entries: metadata.entries,
                    })
                }
                None => None,
            };
            let options = SweepOptions {
                output_dir: Some(output.clone()),
                test_audio,
                test_set,
                folds: if folds.is_empty() { None } else { Some(folds) },
            };

            let results = run_sweep(&generator, &experiment, mode.clone(), options)?;
            let report = SweepReport::from_results(&results, &mode);
            write_report(&report, &output.join("report.json"))?;
            if let (true, SweepMode::Search(range)) = (plot, &mode) {
                let plots = plot_elbow_curves(&results, range, &output.join("elbows"))?;
                log::info!("wrote {} elbow plots", plots.len());
            }
            print!("{}", format_summary(&report));
        }
        Commands::Infer {
            input,
            configs,
            models,
            fold,
        } => {
            let experiment = load_experiment(&configs)?;
            let codebooks = load_codebooks(&models, fold, experiment.dataset.n_classes)?;
            let classifier = PcaSvcPipeline::load(&classifier_dir(&models, fold))?;
            let inference = InferenceConfig::from_experiment(&experiment);
            let result = infer_single(&input, &codebooks, &classifier, &inference)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            println!(
                "class 0 confidence: {:.3} (predicted class {})",
                result.class_zero_confidence(),
                result.predicted_class()
            );
        }
        Commands::ValidateConfig { config } => {
            let experiment: ExperimentConfig = skm_audio::config::load_config(config)?;
            println!("Configuration is valid");
            println!("{}", serde_json::to_string_pretty(&experiment)?);
        }
        Commands::ShowConfig { output } => {
            let experiment = ExperimentConfig::default();
            match output {
                Some(path) => {
                    config::save_config(&experiment, &path)?;
                    println!("Default configuration written to {}", path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&experiment)?),
            }
        }
    }

    Ok(())
}
