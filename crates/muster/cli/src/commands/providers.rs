//! `muster providers`: list the registered providers

use muster_provisioner::ProviderRegistry;
use serde::Serialize;

use crate::error::CliResult;
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize)]
struct ProviderList<'a> {
    default: &'a str,
    providers: Vec<String>,
}

pub fn execute(registry: &ProviderRegistry, default: &str, format: OutputFormat) -> CliResult<()> {
    let list = ProviderList {
        default,
        providers: registry.names(),
    };
    output::print(format, &list, || render(&list))
}

fn render(list: &ProviderList<'_>) -> String {
    list.providers
        .iter()
        .map(|name| {
            if name.eq_ignore_ascii_case(list.default.trim()) {
                format!("{} (default)\n", name)
            } else {
                format!("{}\n", name)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_marked() {
        let list = ProviderList {
            default: "Local",
            providers: ProviderRegistry::with_defaults().names(),
        };
        assert_eq!(render(&list), "local (default)\n");
    }
}
