use colored::Colorize;
use exporter_collectors::ExporterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Warn,
    Fail,
}

impl Status {
    fn tag(self) -> &'static str {
        match self {
            Status::Ok => "[ ok ]",
            Status::Warn => "[warn]",
            Status::Fail => "[fail]",
        }
    }
}

/// `azure-exporter <section>`, bold, followed by a blank line.
pub fn section(name: &str) {
    println!("{} {}\n", "azure-exporter".bold(), name.cyan());
}

/// One status line with a fixed-width tag, e.g. `[ ok ] Configuration is valid`.
pub fn status(kind: Status, text: &str) {
    let tag = match kind {
        Status::Ok => kind.tag().green(),
        Status::Warn => kind.tag().yellow(),
        Status::Fail => kind.tag().red(),
    };
    println!("{} {}", tag.bold(), text);
}

/// Effective settings, one per line.
pub fn print_config(config: &ExporterConfig) {
    println!("  Subscription: {}", config.subscription_id.green());
    println!("  Updaters: {}", config.updaters.join(", "));
    println!(
        "  Update interval: {}",
        humantime::format_duration(config.update_interval)
    );
    println!(
        "  Call timeout: {}",
        humantime::format_duration(config.call_timeout)
    );
    println!("  Cache TTL: {}", humantime::format_duration(config.cache_ttl));
    println!("  Listen: {}", config.listen.socket_address());
    println!("  Management endpoint: {}", config.management_endpoint);

    if config.discovery.required_tags.is_empty() {
        println!("  Required tags: {}", "none (every account is collected)".dimmed());
    } else {
        let mut tags: Vec<_> = config.discovery.required_tags.iter().collect();
        tags.sort();
        println!("  Required tags:");
        for (name, value) in tags {
            println!("    {}={}", name, value);
        }
    }
}
