//! CLI surface and derived settings

use clap::Parser;

/// Passive AMQP interception for broker security assessment
///
/// Attaches covert, non-destructive consumers to everything the given
/// credentials can read, observes live traffic, and transparently requeues
/// directly-addressed messages so their real consumers still receive them.
#[derive(Parser, Debug, Clone)]
#[command(name = "amq-shadow", version)]
pub struct Cli {
    /// Broker management URL, e.g. http://broker:15672
    pub url: String,

    /// Username for the management API and the wire protocol
    #[arg(short, long, default_value = "guest")]
    pub username: String,

    /// Password for the management API and the wire protocol
    #[arg(short, long, default_value = "guest")]
    pub password: String,

    /// Verbose logging (debug detail, full property sets)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Default log filter for the chosen verbosity
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "amq_shadow=debug,info"
        } else {
            "info"
        }
    }
}
