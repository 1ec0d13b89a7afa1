//! foreman CLI - submit and inspect jobs on the queue engine.

use clap::{Parser, Subcommand};
use foreman_core::{Client, ClientConfig, PutOptions};

#[derive(Parser)]
#[command(name = "foreman")]
#[command(about = "Job submission and inspection for the foreman job queue")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Redis URL of the queue engine
    #[arg(long, global = true, default_value = "redis://127.0.0.1:6379/")]
    redis: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a job
    Put {
        /// Queue to put the job on
        queue: String,

        /// Handler class name
        klass: String,

        /// Payload as JSON
        #[arg(long, default_value = "{}")]
        data: String,

        /// Delay before the job becomes available, in seconds
        #[arg(long, default_value_t = 0)]
        delay: u64,

        #[arg(long)]
        priority: Option<i64>,

        /// Tag to attach (repeatable)
        #[arg(long)]
        tag: Vec<String>,

        #[arg(long)]
        retries: Option<i64>,

        /// Jid this job depends on (repeatable)
        #[arg(long)]
        depends: Vec<String>,
    },

    /// Print a job record
    Get {
        jid: String,
    },

    /// Cancel a job
    Cancel {
        jid: String,
    },

    /// Print the number of jobs waiting on a queue
    Len {
        queue: String,
    },

    /// List failed jobs: counts per group, or jobs of one group
    Failed {
        #[arg(long)]
        group: Option<String>,

        #[arg(long, default_value_t = 0)]
        start: u64,

        #[arg(long, default_value_t = 25)]
        count: u64,
    },

    /// Read or write engine configuration
    Config {
        #[command(subcommand)]
        op: ConfigOp,
    },
}

#[derive(Subcommand)]
enum ConfigOp {
    Get { name: String },
    Set { name: String, value: String },
    Clear { name: String },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let client = Client::connect(ClientConfig::new(&cli.redis))?;

    match cli.command {
        Commands::Put {
            queue,
            klass,
            data,
            delay,
            priority,
            tag,
            retries,
            depends,
        } => {
            let data: serde_json::Value = serde_json::from_str(&data)
                .map_err(|e| anyhow::anyhow!("--data is not valid JSON: {e}"))?;
            let opts = PutOptions {
                delay,
                priority,
                tags: tag,
                retries,
                depends,
            };
            let jid = client.queue(&queue).put(&klass, &data, &opts)?;
            println!("{jid}");
        }

        Commands::Get { jid } => match client.jobs().get(&jid)? {
            Some(job) => {
                let record: serde_json::Value = serde_json::from_str(job.raw())?;
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
            None => anyhow::bail!("job {jid} not found"),
        },

        Commands::Cancel { jid } => client.cancel(&jid)?,

        Commands::Len { queue } => println!("{}", client.length(&queue)?),

        Commands::Failed {
            group,
            start,
            count,
        } => match group {
            Some(group) => {
                for job in client.jobs().failed(&group, start, count)? {
                    let message = job
                        .failure
                        .as_ref()
                        .map(|f| f.message.as_str())
                        .unwrap_or("");
                    println!("{}\t{}\t{}", job.jid, job.klass, message);
                }
            }
            None => {
                for (group, count) in client.jobs().failed_counts()? {
                    println!("{group}\t{count}");
                }
            }
        },

        Commands::Config { op } => match op {
            ConfigOp::Get { name } => {
                println!("{}", client.config_get(&name)?.unwrap_or_default());
            }
            ConfigOp::Set { name, value } => client.config_set(&name, &value)?,
            ConfigOp::Clear { name } => client.config_clear(&name)?,
        },
    }

    Ok(())
}
