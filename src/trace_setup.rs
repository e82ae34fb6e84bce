//! Which functions to trace, and how
//!
//! A setup maps each application (a binary path, or the `built-ins` group
//! for kernel and library functions) to its functions, whether each is
//! traced, and which arguments to capture with which bcc format. The setup
//! renders to the probe arguments of the bcc `trace` tool:
//!
//! ```text
//! /path/test_application:func1 "%s %s", arg1, arg2
//! /path/test_application:func2 "%d", arg1
//! /path/test_application:func3
//! do_sys_open
//! ```
//!
//! Functions are keyed by their demangled name; probes always use the raw
//! symbol, and either name is accepted when picking functions to trace.

use memmap2::Mmap;
use object::{Object, ObjectSymbol, SymbolKind};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Application name under which built-in functions are grouped
pub const BUILT_INS: &str = "built-ins";

/// Errors that can occur while building a trace setup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("Binary at {0} already added")]
    BinaryAlreadyAdded(String),

    #[error("Could not find binary at {0}, so it is assumed to be a built-in function")]
    BinaryNotFound(String),

    #[error("No application named {0} was added")]
    AppNotFound(String),

    #[error("No function named {function} was found in {app}")]
    FunctionNotFound { app: String, function: String },

    #[error("{0}")]
    WrongConfigFile(String),
}

pub type Result<T> = std::result::Result<T, SetupError>;

/// Trace state of one function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionSetup {
    /// Raw symbol name, used as the probe target
    pub mangled: String,
    pub traced: bool,
    /// Argument index (1-based) → bcc format specifier
    pub parameters: BTreeMap<u32, String>,
}

#[derive(Debug, Clone, Default)]
pub struct TraceSetup {
    apps: BTreeMap<String, BTreeMap<String, FunctionSetup>>,
}

/// Demangle a Rust or C++ symbol, returning it unchanged if it is neither
pub fn demangle(symbol: &str) -> String {
    if let Ok(demangled) = rustc_demangle::try_demangle(symbol) {
        // Alternate form drops the trailing hash
        return format!("{:#}", demangled);
    }
    cpp_demangle::Symbol::new(symbol)
        .ok()
        .and_then(|cpp| cpp.demangle(&cpp_demangle::DemangleOptions::default()).ok())
        .unwrap_or_else(|| symbol.to_string())
}

/// Key symbols by demangled name, the first symbol winning on collision
fn functions_from_symbols(symbols: Vec<String>) -> BTreeMap<String, FunctionSetup> {
    let mut functions = BTreeMap::new();
    for mangled in symbols {
        functions.entry(demangle(&mangled)).or_insert(FunctionSetup {
            mangled,
            traced: false,
            parameters: BTreeMap::new(),
        });
    }
    functions
}

/// Look `function` up by demangled name, then by raw symbol
fn find_function<'a>(
    functions: &'a mut BTreeMap<String, FunctionSetup>,
    function: &str,
) -> Option<&'a mut FunctionSetup> {
    if functions.contains_key(function) {
        return functions.get_mut(function);
    }
    functions
        .values_mut()
        .find(|setup| setup.mangled == function)
}

/// Defined function symbols of an object file
pub fn function_symbols(path: &Path) -> anyhow::Result<Vec<String>> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file) }?;
    let object = object::File::parse(&*mmap)?;

    let mut names: Vec<String> = object
        .symbols()
        .chain(object.dynamic_symbols())
        .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.is_definition())
        .filter_map(|symbol| symbol.name().ok().map(str::to_string))
        .filter(|name| !name.is_empty())
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

impl TraceSetup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binary with all of its functions untraced
    pub fn initialize_binary(&mut self, path: &str) -> Result<()> {
        if self.apps.contains_key(path) {
            return Err(SetupError::BinaryAlreadyAdded(path.to_string()));
        }

        let symbols = function_symbols(Path::new(path)).map_err(|err| {
            tracing::debug!(path, %err, "failed to read symbols");
            SetupError::BinaryNotFound(path.to_string())
        })?;
        tracing::debug!(path, functions = symbols.len(), "initialized binary");

        self.apps
            .insert(path.to_string(), functions_from_symbols(symbols));
        Ok(())
    }

    /// Register a traced built-in function (no binary to resolve)
    pub fn initialize_built_in(&mut self, function: &str) {
        self.apps
            .entry(BUILT_INS.to_string())
            .or_default()
            .insert(
                function.to_string(),
                FunctionSetup {
                    mangled: function.to_string(),
                    traced: true,
                    parameters: BTreeMap::new(),
                },
            );
    }

    pub fn remove_app(&mut self, app: &str) -> Result<()> {
        self.apps
            .remove(app)
            .map(|_| ())
            .ok_or_else(|| SetupError::AppNotFound(app.to_string()))
    }

    pub fn apps(&self) -> Vec<&str> {
        self.apps.keys().map(String::as_str).collect()
    }

    pub fn functions(&self, app: &str) -> Result<&BTreeMap<String, FunctionSetup>> {
        self.apps
            .get(app)
            .ok_or_else(|| SetupError::AppNotFound(app.to_string()))
    }

    fn function_mut(&mut self, app: &str, function: &str) -> Result<&mut FunctionSetup> {
        let functions = self
            .apps
            .get_mut(app)
            .ok_or_else(|| SetupError::AppNotFound(app.to_string()))?;
        find_function(functions, function).ok_or_else(|| SetupError::FunctionNotFound {
            app: app.to_string(),
            function: function.to_string(),
        })
    }

    pub fn trace_function(&mut self, app: &str, function: &str) -> Result<()> {
        self.function_mut(app, function)?.traced = true;
        Ok(())
    }

    pub fn untrace_function(&mut self, app: &str, function: &str) -> Result<()> {
        self.function_mut(app, function)?.traced = false;
        Ok(())
    }

    /// Capture argument `index` (1-based) of `function` using bcc `format`
    pub fn add_parameter(&mut self, app: &str, function: &str, index: u32, format: &str) -> Result<()> {
        self.function_mut(app, function)?
            .parameters
            .insert(index, format.to_string());
        Ok(())
    }

    pub fn remove_parameter(&mut self, app: &str, function: &str, index: u32) -> Result<()> {
        self.function_mut(app, function)?.parameters.remove(&index);
        Ok(())
    }

    pub fn parameters(&self, app: &str, function: &str) -> Result<&BTreeMap<u32, String>> {
        let functions = self.functions(app)?;
        functions
            .get(function)
            .or_else(|| functions.values().find(|setup| setup.mangled == function))
            .map(|setup| &setup.parameters)
            .ok_or_else(|| SetupError::FunctionNotFound {
                app: app.to_string(),
                function: function.to_string(),
            })
    }

    /// Probe arguments for the bcc `trace` tool, one per traced function
    pub fn bcc_args(&self) -> Vec<String> {
        let mut arguments = Vec::new();

        for (app, functions) in &self.apps {
            for setup in functions.values().filter(|setup| setup.traced) {
                let mut argument = if app == BUILT_INS {
                    setup.mangled.clone()
                } else {
                    format!("{}:{}", app, setup.mangled)
                };

                if !setup.parameters.is_empty() {
                    let formats: Vec<&str> = setup.parameters.values().map(String::as_str).collect();
                    let args: Vec<String> = setup
                        .parameters
                        .keys()
                        .map(|index| format!("arg{}", index))
                        .collect();
                    argument = format!("{} \"{}\", {}", argument, formats.join(" "), args.join(", "));
                }
                arguments.push(argument);
            }
        }
        arguments
    }

    /// Load a TOML setup file: `[app.function]` tables of `index = "format"`
    ///
    /// An application that is not a readable binary is taken to be a built-in
    /// function, its table holding the parameters directly. Returns a warning
    /// when that happened.
    pub fn load_from_file(&mut self, path: &Path) -> Result<Option<String>> {
        if path.is_dir() {
            return Err(SetupError::WrongConfigFile(format!(
                "{} is a directory, not a file",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|_| {
            SetupError::WrongConfigFile(format!("Could not find config file at {}", path.display()))
        })?;
        self.load_from_str(&content)
    }

    /// Same as [`TraceSetup::load_from_file`] for already-read content
    pub fn load_from_str(&mut self, content: &str) -> Result<Option<String>> {
        let config: toml::Table = content
            .parse()
            .map_err(|_| SetupError::WrongConfigFile("File needs to be TOML format".to_string()))?;

        let mut warning = None;
        for (app, functions) in &config {
            let functions = as_table(functions)?;

            match self.initialize_binary(app) {
                Ok(()) => {
                    for (function, parameters) in functions {
                        self.trace_function(app, function)?;
                        for (index, format) in parse_parameters(as_table(parameters)?)? {
                            self.add_parameter(app, function, index, &format)?;
                        }
                    }
                }
                Err(SetupError::BinaryNotFound(_)) => {
                    self.initialize_built_in(app);
                    for (index, format) in parse_parameters(functions)? {
                        self.add_parameter(BUILT_INS, app, index, &format)?;
                    }
                    tracing::warn!(app = %app, "binary not found, tracing as built-in");
                    warning = Some(
                        "Some binaries were not found so they were assumed to be built-in functions"
                            .to_string(),
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(warning)
    }
}

fn wrong_format() -> SetupError {
    SetupError::WrongConfigFile("File format is incorrect".to_string())
}

fn as_table(value: &toml::Value) -> Result<&toml::Table> {
    value.as_table().ok_or_else(wrong_format)
}

fn parse_parameters(table: &toml::Table) -> Result<Vec<(u32, String)>> {
    table
        .iter()
        .map(|(index, format)| {
            let index = index.parse::<u32>().map_err(|_| wrong_format())?;
            let format = format.as_str().ok_or_else(wrong_format)?;
            Ok((index, format.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current_exe() -> String {
        std::env::current_exe()
            .unwrap()
            .to_string_lossy()
            .into_owned()
    }

    fn setup_with(app: &str, functions: &[&str]) -> TraceSetup {
        let mut setup = TraceSetup::new();
        setup.apps.insert(
            app.to_string(),
            functions
                .iter()
                .map(|f| {
                    let setup = FunctionSetup {
                        mangled: f.to_string(),
                        ..FunctionSetup::default()
                    };
                    (f.to_string(), setup)
                })
                .collect(),
        );
        setup
    }

    #[test]
    fn test_demangle() {
        assert_eq!(demangle("_ZN4core3fmt5write17h0123456789abcdefE"), "core::fmt::write");
        assert_eq!(demangle("_Z3fooi"), "foo(int)");
        assert_eq!(demangle("func1"), "func1");
    }

    #[test]
    fn test_functions_keyed_by_demangled_name() {
        let mut setup = TraceSetup::new();
        setup.apps.insert(
            "app".to_string(),
            functions_from_symbols(vec!["_Z3fooi".to_string(), "_Z3bard".to_string()]),
        );

        setup.trace_function("app", "foo(int)").unwrap();
        setup.trace_function("app", "_Z3bard").unwrap();
        setup.add_parameter("app", "_Z3fooi", 1, "%d").unwrap();

        assert_eq!(setup.parameters("app", "foo(int)").unwrap().len(), 1);
        assert!(setup.functions("app").unwrap()["bar(double)"].traced);
        assert_eq!(
            setup.bcc_args(),
            vec!["app:_Z3bard", "app:_Z3fooi \"%d\", arg1"]
        );

        setup.untrace_function("app", "_Z3fooi").unwrap();
        setup.untrace_function("app", "bar(double)").unwrap();
        assert!(setup.bcc_args().is_empty());
    }

    #[test]
    fn test_binary_keeps_raw_symbols() {
        let exe = current_exe();
        let mut setup = TraceSetup::new();
        setup.initialize_binary(&exe).unwrap();

        let functions = setup.functions(&exe).unwrap();
        assert_eq!(functions["main"].mangled, "main");
        assert!(functions
            .iter()
            .any(|(name, function)| *name != function.mangled && function.mangled.starts_with("_")));
    }

    #[test]
    fn test_initialize_binary_reads_symbols() {
        let exe = current_exe();
        let mut setup = TraceSetup::new();
        setup.initialize_binary(&exe).unwrap();

        let functions = setup.functions(&exe).unwrap();
        assert!(functions.contains_key("main"));
        assert!(functions.values().all(|f| !f.traced));
        assert_eq!(setup.apps(), vec![exe.as_str()]);
    }

    #[test]
    fn test_initialize_binary_twice() {
        let exe = current_exe();
        let mut setup = TraceSetup::new();
        setup.initialize_binary(&exe).unwrap();
        assert_eq!(
            setup.initialize_binary(&exe),
            Err(SetupError::BinaryAlreadyAdded(exe.clone()))
        );
    }

    #[test]
    fn test_initialize_missing_binary() {
        let mut setup = TraceSetup::new();
        let err = setup.initialize_binary("/nonexistent/app").unwrap_err();
        assert_eq!(err, SetupError::BinaryNotFound("/nonexistent/app".to_string()));
        assert!(setup.apps().is_empty());
    }

    #[test]
    fn test_trace_unknown_function() {
        let mut setup = setup_with("app", &["func1"]);
        assert_eq!(
            setup.trace_function("app", "nope"),
            Err(SetupError::FunctionNotFound {
                app: "app".to_string(),
                function: "nope".to_string()
            })
        );
        assert!(matches!(
            setup.trace_function("other", "func1"),
            Err(SetupError::AppNotFound(_))
        ));
    }

    #[test]
    fn test_bcc_args() {
        let mut setup = setup_with("/bin/app", &["func1", "func2", "func3", "func4"]);
        setup.trace_function("/bin/app", "func1").unwrap();
        setup.trace_function("/bin/app", "func2").unwrap();
        setup.trace_function("/bin/app", "func3").unwrap();
        setup.add_parameter("/bin/app", "func1", 2, "%s").unwrap();
        setup.add_parameter("/bin/app", "func1", 1, "%s").unwrap();
        setup.add_parameter("/bin/app", "func2", 1, "%d").unwrap();
        setup.initialize_built_in("do_sys_open");

        assert_eq!(
            setup.bcc_args(),
            vec![
                "/bin/app:func1 \"%s %s\", arg1, arg2",
                "/bin/app:func2 \"%d\", arg1",
                "/bin/app:func3",
                "do_sys_open",
            ]
        );
    }

    #[test]
    fn test_untrace_and_remove_parameter() {
        let mut setup = setup_with("app", &["func1"]);
        setup.trace_function("app", "func1").unwrap();
        setup.add_parameter("app", "func1", 1, "%d").unwrap();
        setup.remove_parameter("app", "func1", 1).unwrap();
        assert!(setup.parameters("app", "func1").unwrap().is_empty());
        assert_eq!(setup.bcc_args(), vec!["app:func1"]);

        setup.untrace_function("app", "func1").unwrap();
        assert!(setup.bcc_args().is_empty());
    }

    #[test]
    fn test_remove_app() {
        let mut setup = setup_with("app", &["func1"]);
        setup.remove_app("app").unwrap();
        assert!(setup.apps().is_empty());
        assert!(setup.remove_app("app").is_err());
    }

    #[test]
    fn test_load_from_str_with_binary() {
        let exe = current_exe();
        let config = format!("[\"{}\".main]\n1 = \"%d\"\n", exe);
        let mut setup = TraceSetup::new();

        assert_eq!(setup.load_from_str(&config).unwrap(), None);
        assert_eq!(setup.bcc_args(), vec![format!("{}:main \"%d\", arg1", exe)]);
    }

    #[test]
    fn test_load_from_str_built_in_fallback() {
        let mut setup = TraceSetup::new();
        let warning = setup
            .load_from_str("[do_sys_open]\n2 = \"%s\"\n")
            .unwrap();

        assert!(warning.unwrap().contains("built-in"));
        assert_eq!(setup.bcc_args(), vec!["do_sys_open \"%s\", arg2"]);
    }

    #[test]
    fn test_load_from_str_rejects_bad_content() {
        let mut setup = TraceSetup::new();
        assert_eq!(
            setup.load_from_str("not = [toml"),
            Err(SetupError::WrongConfigFile("File needs to be TOML format".to_string()))
        );
        assert_eq!(
            setup.load_from_str("app = 3"),
            Err(SetupError::WrongConfigFile("File format is incorrect".to_string()))
        );
        assert_eq!(
            setup.load_from_str("[builtin]\nfirst = \"%s\""),
            Err(SetupError::WrongConfigFile("File format is incorrect".to_string()))
        );
    }

    #[test]
    fn test_load_from_missing_file_and_directory() {
        let mut setup = TraceSetup::new();
        let err = setup
            .load_from_file(Path::new("/nonexistent/setup.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("Could not find config file"));

        let dir = tempfile::tempdir().unwrap();
        let err = setup.load_from_file(dir.path()).unwrap_err();
        assert!(err.to_string().contains("is a directory"));
    }
}
