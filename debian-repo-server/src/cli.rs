// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::server::{refresh_loop, router, AppState, BasicCredentials},
    clap::{Arg, ArgMatches, Command},
    debian_repo_index::{
        error::RepositoryError,
        repository::{
            filesystem::{FilesystemBackend, FilesystemPublisher},
            Repository, RepositoryConfig,
        },
        signing::{ManifestSigner, PgpSigner},
    },
    log::{info, warn, LevelFilter},
    std::{
        net::SocketAddr,
        path::{Path, PathBuf},
        sync::Arc,
        time::Duration,
    },
    thiserror::Error,
};

const DEFAULT_USER_ID: &str = "Debian Repository <repository@localhost>";

const CONFIG_ABOUT: &str = "\
# YAML Configuration

The `--config` argument points at a YAML file describing the repository. All
keys are optional.

release (mapping)
   Fields of the generated `Release` manifest.

   suite (string)
      Suite name. Also the directory under `dists/`. Defaults to `stable`.
   codename (string)
   origin (string)
   label (string)
   description (string)
   component (string)
      Component holding all packages. Defaults to `main`.

pool_prefix (string)
   Prefix of the `Filename` of every package. Archives are served beneath
   this path. Defaults to `pool/main`.

max_parallel_io (integer)
   Maximum number of archives read concurrently.

read_timeout_secs (integer)
   Time allowed for reading a single archive. `0` disables the limit.
   Defaults to 60.

# Signing

If `--signing-key` names a file that does not exist, a new key is generated
and written there. Otherwise the file is read as an ASCII armored PGP secret
key without a passphrase.
";

const SERVE_ABOUT: &str = "\
Serve a Debian repository over HTTP.

The directory given by `--debs` is scanned for `.deb` files. The newest version
of every package is published in `dists/<suite>/<component>/binary-<arch>/Packages`
and the archives themselves are served beneath the pool prefix.

The following endpoints are available:

GET /dists/<suite>/Release
GET /dists/<suite>/Release.gpg
GET /dists/<suite>/InRelease
GET /dists/<suite>/<component>/binary-<arch>/Packages
GET /<pool prefix>/<path of .deb file>
GET /pubkey.gpg
GET /
   Repository status as JSON.
POST /rebuild
   Rescan the directory and regenerate all files.

Every request is logged with its method, path and response status.

If `--http-user` and `--http-pass` are given, every endpoint requires HTTP
basic authentication with those credentials. Requests without them are
answered with `401 Unauthorized`.
";

const BUILD_ABOUT: &str = "\
Write a Debian repository to a directory.

Generated files are written beneath `dists/<suite>/` and indexed archives are
copied to their pool location. The resulting directory can be served by any
static HTTP server.
";

#[derive(Debug, Error)]
pub enum DrsError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0:?}")]
    Repository(#[from] RepositoryError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("invalid listen address: {0}")]
    ListenAddress(#[from] std::net::AddrParseError),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, DrsError>;

pub async fn run_cli() -> Result<()> {
    let default_threads = format!("{}", num_cpus::get());

    let app = Command::new("Debian Repository Server")
        .version("0.1")
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Publish a directory of .deb files as a Debian repository")
        .after_long_help(CONFIG_ABOUT)
        .arg_required_else_help(true);

    let app = app
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("max-parallel-io")
                .long("--max-parallel-io")
                .takes_value(true)
                .default_value(&default_threads)
                .global(true)
                .help("Maximum number of parallel I/O operations to perform"),
        );

    let debs_arg = Arg::new("debs")
        .long("--debs")
        .takes_value(true)
        .required(true)
        .allow_invalid_utf8(true)
        .help("Directory holding .deb files");
    let config_arg = Arg::new("config")
        .long("--config")
        .takes_value(true)
        .allow_invalid_utf8(true)
        .help("Path to a YAML file defining the repository configuration");
    let signing_key_arg = Arg::new("signing-key")
        .long("--signing-key")
        .takes_value(true)
        .allow_invalid_utf8(true)
        .help("Path to an ASCII armored PGP secret key used to sign the manifest");

    let app = app.subcommand(
        Command::new("serve")
            .about("Serve a repository over HTTP")
            .long_about(SERVE_ABOUT)
            .arg(debs_arg.clone())
            .arg(config_arg.clone())
            .arg(signing_key_arg.clone())
            .arg(
                Arg::new("listen")
                    .long("--listen")
                    .takes_value(true)
                    .default_value("127.0.0.1:8080")
                    .help("Address to listen on"),
            )
            .arg(
                Arg::new("refresh-interval")
                    .long("--refresh-interval")
                    .takes_value(true)
                    .default_value("0")
                    .help("Seconds between automatic rebuilds. 0 disables them"),
            )
            .arg(
                Arg::new("http-user")
                    .long("--http-user")
                    .takes_value(true)
                    .requires("http-pass")
                    .help("Username required via HTTP basic authentication"),
            )
            .arg(
                Arg::new("http-pass")
                    .long("--http-pass")
                    .takes_value(true)
                    .requires("http-user")
                    .help("Password required via HTTP basic authentication"),
            ),
    );

    let app = app.subcommand(
        Command::new("build")
            .about("Write a repository to a directory")
            .long_about(BUILD_ABOUT)
            .arg(debs_arg)
            .arg(config_arg)
            .arg(signing_key_arg)
            .arg(
                Arg::new("output")
                    .long("--output")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Directory to write the repository to"),
            ),
    );

    let mut app = app.subcommand(
        Command::new("generate-key")
            .about("Generate a PGP key for signing repositories")
            .arg(
                Arg::new("user-id")
                    .long("--user-id")
                    .takes_value(true)
                    .default_value(DEFAULT_USER_ID)
                    .help("User ID of the key, in the form `Name <email>`"),
            )
            .arg(
                Arg::new("output")
                    .long("--output")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Path to write the ASCII armored secret key to"),
            ),
    );

    let matches = app.clone().get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("serve", args)) => command_serve(args).await,
        Some(("build", args)) => command_build(args).await,
        Some(("generate-key", args)) => command_generate_key(args),
        Some((command, _)) => Err(DrsError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

fn load_config(args: &ArgMatches) -> Result<RepositoryConfig> {
    let mut config = if let Some(path) = args.value_of_os("config") {
        let f = std::fs::File::open(path)?;
        serde_yaml::from_reader(f)?
    } else {
        RepositoryConfig::default()
    };

    if args.occurrences_of("max-parallel-io") > 0 {
        config.max_parallel_io = args.value_of_t::<usize>("max-parallel-io")?;
    }

    Ok(config)
}

fn write_key(path: &Path, signer: &PgpSigner) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, signer.to_armored()?)?;

    Ok(())
}

/// Load the signing key at `path`, generating it first if it does not exist.
fn load_signer(args: &ArgMatches) -> Result<Option<Arc<dyn ManifestSigner>>> {
    let path = match args.value_of_os("signing-key") {
        Some(path) => PathBuf::from(path),
        None => return Ok(None),
    };

    let signer = if path.exists() {
        info!("loading signing key from {}", path.display());
        PgpSigner::from_armored(&std::fs::read_to_string(&path)?, "")?
    } else {
        warn!(
            "signing key {} does not exist; generating a new key",
            path.display()
        );
        let signer = PgpSigner::generate(DEFAULT_USER_ID)?;
        write_key(&path, &signer)?;
        signer
    };

    Ok(Some(Arc::new(signer)))
}

fn credentials(args: &ArgMatches) -> Option<BasicCredentials> {
    match (args.value_of("http-user"), args.value_of("http-pass")) {
        (Some(username), Some(password)) => Some(BasicCredentials::new(username, password)),
        _ => None,
    }
}

fn debs_dir(args: &ArgMatches) -> PathBuf {
    PathBuf::from(args.value_of_os("debs").expect("debs argument is required"))
}

async fn command_serve(args: &ArgMatches) -> Result<()> {
    let debs = debs_dir(args);
    let config = load_config(args)?;
    let signer = load_signer(args)?;
    let listen = args.value_of_t::<String>("listen")?.parse::<SocketAddr>()?;
    let refresh_interval = args.value_of_t::<u64>("refresh-interval")?;
    let credentials = credentials(args);

    let repository = Arc::new(Repository::new(
        Arc::new(FilesystemBackend::new(&debs)),
        config,
    ));

    let report = repository.rebuild().await?;
    info!(
        "indexed {} of {} archives for {} architectures",
        report.populate.indexed,
        report.populate.archives,
        report.generate.architectures.len()
    );

    if refresh_interval > 0 {
        tokio::spawn(refresh_loop(
            repository.clone(),
            Duration::from_secs(refresh_interval),
        ));
    }

    if let Some(credentials) = &credentials {
        info!(
            "requiring HTTP basic authentication as {}",
            credentials.username
        );
    }

    let app = router(
        AppState {
            repository,
            signer,
            credentials,
        },
        &debs,
    );

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn command_build(args: &ArgMatches) -> Result<()> {
    let debs = debs_dir(args);
    let output = PathBuf::from(
        args.value_of_os("output")
            .expect("output argument is required"),
    );
    let config = load_config(args)?;
    let signer = load_signer(args)?;

    let pool_prefix = config.pool_prefix.clone();
    let backend = Arc::new(FilesystemBackend::new(&debs));
    let repository = Repository::new(backend.clone(), config);

    repository.rebuild().await?;

    let snapshot = repository
        .snapshot()
        .ok_or(RepositoryError::RepositoryNotPopulated)?;
    let packages = repository
        .package_set()
        .ok_or(RepositoryError::RepositoryNotPopulated)?;

    let publisher = FilesystemPublisher::new(&output);
    let written = publisher.publish_snapshot(&snapshot, signer.as_deref())?;
    let copied = publisher
        .publish_pool(backend.as_ref(), &pool_prefix, &packages)
        .await?;

    info!(
        "wrote {} files and {} bytes of archives to {}",
        written.len(),
        copied,
        output.display()
    );

    Ok(())
}

fn command_generate_key(args: &ArgMatches) -> Result<()> {
    let user_id = args.value_of_t::<String>("user-id")?;
    let output = PathBuf::from(
        args.value_of_os("output")
            .expect("output argument is required"),
    );

    let signer = PgpSigner::generate(&user_id)?;
    write_key(&output, &signer)?;

    println!("{}", signer.public_key_armored()?);
    info!("wrote secret key to {}", output.display());

    Ok(())
}
