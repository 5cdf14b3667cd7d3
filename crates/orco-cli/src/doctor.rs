//! System diagnostics: configuration load and provider readiness.

use anyhow::Result;

use orco_core::OrchestratorConfig;
use orco_providers::{register_builtins, LocalProvider, ProviderRegistry, ToolRegistry};

/// Run the diagnostic checks, printing one line per check.
pub async fn run() -> Result<()> {
    println!("orco doctor\n");

    let mut all_ok = true;
    all_ok &= check_config();
    all_ok &= check_api_key();
    all_ok &= check_builtin_tools().await;

    println!();
    if all_ok {
        println!("all checks passed.");
    } else {
        println!("some checks failed; see above.");
        std::process::exit(1);
    }
    Ok(())
}

fn check_config() -> bool {
    print!("configuration... ");
    match OrchestratorConfig::load() {
        Ok(cfg) => {
            println!(
                "ok (mode_router={}, tool_planner={}, verifier={})",
                cfg.mode_router.model, cfg.tool_planner.model, cfg.verifier.model
            );
            true
        }
        Err(e) => {
            println!("failed: {e}");
            false
        }
    }
}

fn check_api_key() -> bool {
    print!("ORCO_API_KEY... ");
    if std::env::var("ORCO_API_KEY").is_ok() {
        println!("set");
    } else {
        println!("not set (use --mock or set ORCO_API_KEY before running `orco run`)");
    }
    true
}

async fn check_builtin_tools() -> bool {
    print!("builtin tool registry... ");
    let mut tools = ToolRegistry::new();
    register_builtins(&mut tools);
    let count = tools.list_definitions().len();

    let mut registry = ProviderRegistry::new();
    registry.register(std::sync::Arc::new(LocalProvider::new("local", tools)));
    match registry.refresh().await {
        Ok(()) if registry.is_ready("local") => {
            println!("ok ({count} tools ready)");
            true
        }
        Ok(()) => {
            println!("registered but not ready");
            false
        }
        Err(e) => {
            println!("failed: {e}");
            false
        }
    }
}
