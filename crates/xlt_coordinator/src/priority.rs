//! Provider → priority/instance-count mapping (`spec.md` §4.9). Kept
//! hard-coded per the Open Question in `spec.md` §9 (see DESIGN.md).

use xlt_protocol::types::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    ApiKeyCloud,
    LocalLlm,
    Other,
}

const API_KEY_CLOUD_PROVIDERS: &[&str] = &["openai", "anthropic", "zhipu", "deepseek"];
const LOCAL_LLM_PROVIDERS: &[&str] = &["ollama", "llamacpp"];

pub fn classify_provider(name: &str) -> ProviderFamily {
    let lower = name.to_ascii_lowercase();
    if API_KEY_CLOUD_PROVIDERS.contains(&lower.as_str()) {
        ProviderFamily::ApiKeyCloud
    } else if LOCAL_LLM_PROVIDERS.contains(&lower.as_str()) {
        ProviderFamily::LocalLlm
    } else {
        ProviderFamily::Other
    }
}

pub fn priority_for(family: ProviderFamily) -> Priority {
    match family {
        ProviderFamily::ApiKeyCloud => Priority::High,
        ProviderFamily::LocalLlm => Priority::Medium,
        ProviderFamily::Other => Priority::Low,
    }
}

fn default_instance_count(family: ProviderFamily) -> u32 {
    match family {
        ProviderFamily::ApiKeyCloud => 3,
        ProviderFamily::LocalLlm => 2,
        ProviderFamily::Other => 1,
    }
}

/// `N = InstanceCountForPriority(priority, service.max_concurrent)`, capped
/// by the worker's advertised concurrency.
pub fn instance_count_for_priority(family: ProviderFamily, max_concurrent: u32) -> u32 {
    default_instance_count(family).min(max_concurrent.max(1))
}
