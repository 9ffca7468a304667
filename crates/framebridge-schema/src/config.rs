/// Controls validator registry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// When true, object schemas reject properties they do not declare.
    pub strict_mode: bool,
    /// When true, schema `default` keywords fill in missing top-level fields.
    pub apply_defaults: bool,
    /// Maximum number of schemas loaded from a directory.
    pub max_schemas_from_directory: usize,
    /// Maximum bytes allowed per schema file loaded from a directory.
    pub max_schema_file_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            apply_defaults: true,
            max_schemas_from_directory: 256,
            max_schema_file_size: 256 * 1024,
        }
    }
}
