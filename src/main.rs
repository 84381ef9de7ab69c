use std::{io::Write as _, process, sync::Arc};

use bytes::Bytes;
use contextdocs::{
    cache::{DocRequest, DocsCache, Invalidation, Maintainer, RecorderSink, SystemClock},
    config::{self, Command, InvalidateArgs, LookupArgs, PutArgs},
    error::AppError,
    infra::telemetry,
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let cache = DocsCache::open(
        settings.cache,
        Arc::new(SystemClock),
        Arc::new(RecorderSink),
    )
    .await?;

    let command = cli_args
        .command
        .unwrap_or(Command::Maintain(config::MaintainArgs::default()));

    let result = match command {
        Command::Maintain(_) => run_maintain(&cache).await,
        Command::Stats => run_stats(&cache).await,
        Command::Invalidate(args) => run_invalidate(&cache, args).await,
        Command::Get(args) => run_get(&cache, args).await,
        Command::Put(args) => run_put(&cache, args).await,
    };

    cache.close().await;
    result
}

async fn run_maintain(cache: &DocsCache) -> Result<(), AppError> {
    let maintainer = Maintainer::new(cache.clone());
    info!(
        interval_secs = maintainer.interval().as_secs(),
        durable = cache.durable_enabled(),
        "Cache maintainer started"
    );

    // Run one cycle up front so a restart cleans up immediately.
    maintainer.run_once().await;
    let handle = maintainer.spawn();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    handle.shutdown().await;
    Ok(())
}

async fn run_stats(cache: &DocsCache) -> Result<(), AppError> {
    let stats = cache.stats().await;
    let json = serde_json::to_string_pretty(&stats)
        .map_err(|err| AppError::unexpected(format!("failed to encode stats: {err}")))?;
    println!("{json}");
    Ok(())
}

async fn run_invalidate(cache: &DocsCache, args: InvalidateArgs) -> Result<(), AppError> {
    let scope = if args.all {
        Invalidation::All
    } else if let Some(library) = args.library {
        Invalidation::library(library)
    } else if let Some(pattern) = args.pattern {
        Invalidation::pattern(&pattern)
            .map_err(|err| AppError::validation(format!("invalid pattern `{pattern}`: {err}")))?
    } else {
        Invalidation::Expired
    };

    let removed = cache.invalidate(scope).await;
    println!("{removed}");
    Ok(())
}

async fn run_get(cache: &DocsCache, args: LookupArgs) -> Result<(), AppError> {
    let request = doc_request(&args)?;
    let payload = cache
        .get_request(&request)
        .await
        .ok_or(AppError::NotFound)?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&payload)?;
    stdout.flush()?;
    Ok(())
}

async fn run_put(cache: &DocsCache, args: PutArgs) -> Result<(), AppError> {
    let request = doc_request(&args.lookup)?;
    let payload = tokio::fs::read(&args.file).await?;
    let size = payload.len();

    cache
        .set_request(&request, Bytes::from(payload), args.content_type.as_deref())
        .await?;

    info!(
        library = %request.library_id,
        topic = %request.topic,
        tokens = request.token_budget,
        size,
        "Payload cached"
    );
    Ok(())
}

fn doc_request(args: &LookupArgs) -> Result<DocRequest, AppError> {
    let request = DocRequest::new(args.library.as_str(), args.topic.as_str(), args.tokens);
    match args.context.as_deref() {
        Some(raw) => {
            let context = serde_json::from_str(raw)
                .map_err(|err| AppError::validation(format!("context is not valid JSON: {err}")))?;
            Ok(request.with_context(context))
        }
        None => Ok(request),
    }
}
