use crate::plugins::registry::{ApiContext, CliPlugin, DEFAULT_USER_AGENT};
use clap::{Arg, ArgAction, ArgMatches, Command};

pub struct HttpCliPlugin;

impl HttpCliPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpCliPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CliPlugin for HttpCliPlugin {
    fn name(&self) -> &'static str {
        "http"
    }

    fn augment_command(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("http_base_url")
                .long("base-url")
                .help_heading("HTTP")
                .help("Evaluation API base url (default: $JUDGEWATCH_API_BASE_URL or http://localhost:8000)")
                .num_args(1),
        )
        .arg(
            Arg::new("http_header")
                .long("header")
                .help_heading("HTTP")
                .help("Extra HTTP header (repeatable), e.g. --header 'Authorization: Bearer xxx'")
                .action(ArgAction::Append)
                .num_args(1),
        )
        .arg(
            Arg::new("http_user_agent")
                .long("user-agent")
                .help_heading("HTTP")
                .help("HTTP User-Agent")
                .default_value(DEFAULT_USER_AGENT)
                .num_args(1),
        )
        .arg(
            Arg::new("http_timeout_secs")
                .long("timeout-secs")
                .help_heading("HTTP")
                .help("Timeout in seconds for run and status requests (not the live stream)")
                .default_value("25")
                .num_args(1),
        )
        .arg(
            Arg::new("http_connect_timeout_secs")
                .long("connect-timeout-secs")
                .help_heading("HTTP")
                .help("Connect timeout in seconds")
                .default_value("10")
                .num_args(1),
        )
    }

    fn apply_matches(&self, matches: &ArgMatches, ctx: &mut ApiContext) -> anyhow::Result<()> {
        if let Some(url) = matches.get_one::<String>("http_base_url") {
            ctx.base_url = ApiContext::parse_base_url(url)?;
        }
        if let Some(ua) = matches.get_one::<String>("http_user_agent") {
            ctx.user_agent = ua.clone();
        }
        if let Some(s) = matches.get_one::<String>("http_timeout_secs") {
            ctx.request_timeout_secs = s.parse()?;
        }
        if let Some(s) = matches.get_one::<String>("http_connect_timeout_secs") {
            ctx.connect_timeout_secs = s.parse()?;
        }

        if let Some(values) = matches.get_many::<String>("http_header") {
            for h in values {
                let (k, v) = h
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("invalid header format: {}", h))?;
                ctx.headers.insert(k.trim().to_string(), v.trim().to_string());
            }
        }

        Ok(())
    }
}
