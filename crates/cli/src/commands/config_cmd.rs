//! `chatweave config` — Configuration inspection.

use chatweave_config::AppConfig;

/// The configuration as TOML followed by the resolved context budget.
pub fn render(config: &AppConfig) -> Result<String, Box<dyn std::error::Error>> {
    let settings = config.context.resolve()?;
    let mut out = toml::to_string_pretty(config)?;

    out.push_str("\n# Resolved context budget\n");
    out.push_str(&format!("# model               = {}\n", settings.model()));
    out.push_str(&format!("# max_context_tokens  = {}\n", settings.max_context_tokens()));
    out.push_str(&format!("# max_prompt_tokens   = {}\n", settings.max_prompt_tokens()));
    out.push_str(&format!("# max_response_tokens = {}\n", settings.max_response_tokens()));
    out.push_str(&format!("# strategy            = {}\n", settings.strategy()));
    if !config.has_api_key() {
        out.push_str("# warning: no API key set (refine strategy needs CHATWEAVE_API_KEY or OPENAI_API_KEY)\n");
    }
    Ok(out)
}

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", render(&config)?);
    Ok(())
}

pub fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
