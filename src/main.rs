use std::{io, sync::Arc};

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use verilog_codegen::{
    AppConfig, ModelRegistry, build_router,
    cli::{self, Cli, Commands, PrintOptions},
    finetune::{self, FinetuneJob, TrainingArguments},
    model::ModelArtifacts,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    cli.model.apply(&mut config);

    let result = match cli.command {
        Commands::Generate {
            description,
            no_stream,
            completion_only,
        } => generate(
            config,
            description,
            PrintOptions {
                stream: !no_stream,
                completion_only,
            },
        ),
        Commands::Serve { listen_addr } => {
            if let Some(addr) = listen_addr {
                config.listen_addr = addr;
            }
            serve(config).await
        }
        Commands::Finetune {
            dataset,
            config: args_path,
            output_dir,
            resume_from,
        } => {
            let mut args = match args_path {
                Some(path) => TrainingArguments::from_json_file(&path)?,
                None => TrainingArguments::default(),
            };
            if let Some(dir) = output_dir {
                args.output_dir = dir;
            }
            if resume_from.is_some() {
                args.resume_from_checkpoint = resume_from;
            }
            let job = FinetuneJob {
                dataset_path: dataset,
                base: config,
                args,
            };
            tokio::task::spawn_blocking(move || finetune_blocking(job)).await?
        }
    };

    if let Err(err) = &result {
        tracing::error!("{err:#}");
    }
    result
}

fn generate(
    config: AppConfig,
    description: Option<String>,
    options: PrintOptions,
) -> anyhow::Result<()> {
    tracing::info!(model_id = %config.model_id, "loading model artifacts");
    let generator = ModelArtifacts::load(&config)?.into_generator(&config);
    let generation = config.generation.clone();
    let mut stdout = io::stdout().lock();

    match description {
        Some(description) => {
            cli::write_generation(&generator, &generation, &description, options, &mut stdout)?;
        }
        None => {
            let stdin = io::stdin().lock();
            cli::run_interactive(stdin, &mut stdout, |description, out| {
                cli::write_generation(&generator, &generation, description, options, out)?;
                Ok(())
            })?;
        }
    }
    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    tracing::info!(?config.listen_addr, model_id = %config.model_id, "loading model artifacts");

    let registry = Arc::new(ModelRegistry::pending());
    registry.load_in_background(config.clone());
    let router = build_router(config.clone(), registry);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router).await?;

    Ok(())
}

fn finetune_blocking(job: FinetuneJob) -> anyhow::Result<()> {
    let summary = finetune::run(&job)?;
    tracing::info!(
        output_dir = %summary.output_dir.display(),
        global_step = summary.state.global_step,
        train_loss = ?summary.state.last_train_loss(),
        eval_loss = ?summary.state.last_eval_loss(),
        "fine-tuning complete"
    );
    let reports = [
        ("Before fine-tuning", &summary.baseline),
        ("After fine-tuning", &summary.evaluation),
    ];
    for (label, report) in reports {
        let Some(report) = report else { continue };
        for sample in &report.samples {
            println!("\n[{label}]:\n{}", sample.response.text);
        }
    }
    Ok(())
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
