//! Built-in tools for the agent framework

mod bash;
mod edit_file;
mod sequential_thinking;
mod task_done;

pub use bash::BashTool;
pub use edit_file::EditFileTool;
pub use sequential_thinking::SequentialThinkingTool;
pub use task_done::{reported_success, TaskDoneTool, TASK_DONE};

use super::registry::ToolRegistry;

/// Create a registry with all built-in tools
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(BashTool);
    registry.register(EditFileTool);
    registry.register(SequentialThinkingTool);
    registry.register(TaskDoneTool);

    registry
}

/// Built-in registry restricted to `names`; an empty list keeps everything
pub fn create_registry(names: &[String]) -> ToolRegistry {
    let mut registry = create_default_registry();
    if !names.is_empty() {
        registry.retain(names);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry();
        assert_eq!(
            registry.list_names(),
            vec!["bash", "edit_file", "sequential_thinking", "task_done"]
        );
    }

    #[test]
    fn test_filtered_registry() {
        let registry = create_registry(&["bash".to_string(), TASK_DONE.to_string()]);
        assert_eq!(registry.list_names(), vec!["bash", "task_done"]);
        assert_eq!(create_registry(&[]).len(), 4);
    }
}
