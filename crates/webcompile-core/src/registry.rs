//! Language → build/run command lookup.

use std::collections::BTreeMap;

/// Command used for C#: compile with `mcs`, run with `mono`, report run time.
const CSHARP_COMMAND: &str = "mcs -out:/home/code/code.exe /home/code/source/code.cs; \
     startTime=$(date +%s%3N); \
     if [[ $? == 0 ]]; then mono /home/code/code.exe; \
     endTime=$(date +%s%3N); diff=$(($endTime-$startTime)); \
     echo Code Execution: $diff ms; fi";

/// How to build and run one language inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageCommand {
    /// File name the source is written to, relative to the workspace.
    pub source_file: String,
    /// Shell command run inside the sandbox; expects the source in the mounted directory.
    pub command: String,
}

impl LanguageCommand {
    /// Create a command entry.
    pub fn new(source_file: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            command: command.into(),
        }
    }
}

/// Static mapping from language identifier to its [`LanguageCommand`].
///
/// Identifiers are matched case-insensitively after trimming.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, LanguageCommand>,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the languages the default `mono` image can build.
    pub fn with_defaults() -> Self {
        let csharp = LanguageCommand::new("code.cs", CSHARP_COMMAND);
        Self::new()
            .register("c#", csharp.clone())
            .register("csharp", csharp.clone())
            .register("cs", csharp)
    }

    /// Add or replace a language.
    pub fn register(mut self, language: &str, command: LanguageCommand) -> Self {
        self.commands.insert(normalize(language), command);
        self
    }

    /// Find the command for a language.
    pub fn lookup(&self, language: &str) -> Option<&LanguageCommand> {
        self.commands.get(&normalize(language))
    }

    /// Registered language identifiers, sorted.
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }
}

fn normalize(language: &str) -> String {
    language.trim().to_lowercase()
}
