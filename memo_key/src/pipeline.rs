use regex::Regex;

/// One entry of the ordered `pipeline_memospace_handlers` list: if `pattern` matches a
/// `function_id`, `pipeline_id` is replaced by `replacement`. The first matching handler wins.
pub struct PipelineMemospaceHandler {
    pub pattern: Regex,
    pub replacement: String,
}

impl PipelineMemospaceHandler {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<PipelineMemospaceHandler, String> {
        Ok(PipelineMemospaceHandler {
            pattern: Regex::new(pattern).map_err(|e| format!("invalid memospace pattern {pattern:?}: {e}"))?,
            replacement: replacement.into(),
        })
    }
}

/// Applies the ordered handlers, returning the (possibly overridden) `pipeline_id` for
/// `function_id`. An empty handler list is the common case and leaves `pipeline_id` untouched.
pub fn apply_pipeline_memospace_handlers(
    function_id: &str,
    pipeline_id: &str,
    handlers: &[PipelineMemospaceHandler],
) -> String {
    for handler in handlers {
        if handler.pattern.is_match(function_id) {
            return handler.replacement.clone();
        }
    }
    pipeline_id.to_owned()
}
