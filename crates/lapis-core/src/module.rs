//! Module resolution for `package "<path>" [use a, b];`.
//!
//! A module is loaded once per canonical path and cached, so every importer
//! sees the same top-level environment. Files currently being loaded sit on
//! a stack; reaching one of them again is a circular import.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::ast::{ImportStatement, Program, StringLiteral, Visibility};
use crate::diagnostics::{codes, Diagnostic};
use crate::environment::Env;
use crate::interpreter::Interpreter;
use crate::lexer::Lexer;
use crate::parser;

/// Source file extension tried when an import path has none.
pub const EXTENSION: &str = "lapis";

/// A loaded source file.
pub struct Module {
    /// Canonical path
    pub path: PathBuf,
    pub program: Program,
    /// Top-level scope the file ran in
    pub env: Env,
    /// Names declared `public` at the top level, sorted
    pub exports: Vec<String>,
}

/// Loaded modules and the stack of files being loaded.
#[derive(Default)]
pub struct ModuleCache {
    modules: FxHashMap<PathBuf, Rc<Module>>,
    loading: Vec<PathBuf>,
}

impl ModuleCache {
    pub fn get(&self, path: &Path) -> Option<Rc<Module>> {
        self.modules.get(path).cloned()
    }

    pub fn insert(&mut self, module: Rc<Module>) {
        self.modules.insert(module.path.clone(), module);
    }

    /// Mark `path` as being loaded.
    pub fn enter(&mut self, path: PathBuf) {
        self.loading.push(path);
    }

    pub fn leave(&mut self, path: &Path) {
        if let Some(position) = self.loading.iter().rposition(|p| p == path) {
            self.loading.remove(position);
        }
    }

    pub fn is_loading(&self, path: &Path) -> bool {
        self.loading.iter().any(|p| p == path)
    }

    /// The chain of loads from the first load of `path` back to `path`.
    fn cycle(&self, path: &Path) -> Vec<PathBuf> {
        let start = self.loading.iter().position(|p| p == path).unwrap_or(0);
        let mut chain = self.loading[start..].to_vec();
        chain.push(path.to_path_buf());
        chain
    }
}

/// Candidate files for `specifier` imported from `importer`, in the order
/// they are tried.
pub fn candidates(importer: &str, specifier: &str) -> Vec<PathBuf> {
    let dir = match Path::new(importer).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let base = dir.join(specifier);
    if base.extension().is_some() {
        vec![base]
    } else {
        vec![base.with_extension(EXTENSION), base]
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl Interpreter {
    /// Execute an import directive, binding the requested names in `env`.
    pub(crate) fn import(&mut self, import: &ImportStatement, env: &Env) -> Result<(), Diagnostic> {
        let module = self.load_module(&import.path)?;

        if import.names.is_empty() {
            for (name, value) in self.envs.public_bindings(&module.env) {
                self.envs.define(env, &name, value, Visibility::Private);
            }
            return Ok(());
        }

        for name in &import.names {
            match self.envs.get_local(&module.env, &name.name) {
                Some(binding) if binding.visibility == Visibility::Public => {
                    self.envs
                        .define(env, &name.name, binding.value, Visibility::Private);
                }
                Some(_) => {
                    return Err(Diagnostic::import(
                        codes::SYMBOL_NOT_PUBLIC,
                        format!("'{}' is private to module '{}'", name.name, import.path.value),
                    )
                    .with_span(name.span)
                    .with_help(format!(
                        "declare it as 'public' in {} to import it",
                        display_name(&module.path)
                    ))
                    .build());
                }
                None => {
                    let mut error = Diagnostic::import(
                        codes::SYMBOL_NOT_FOUND,
                        format!("module '{}' has no symbol '{}'", import.path.value, name.name),
                    )
                    .with_span(name.span);
                    if !module.exports.is_empty() {
                        error = error.with_help(format!(
                            "public symbols are: {}",
                            module.exports.join(", ")
                        ));
                    }
                    return Err(error.build());
                }
            }
        }
        Ok(())
    }

    /// Resolve, load and cache the module named by `specifier`.
    pub(crate) fn load_module(&mut self, specifier: &StringLiteral) -> Result<Rc<Module>, Diagnostic> {
        let tried = candidates(&self.current_file, &specifier.value);
        let Some(path) = tried
            .iter()
            .find(|candidate| candidate.is_file())
            .map(|found| found.canonicalize().unwrap_or_else(|_| found.clone()))
        else {
            let looked = tried
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(Diagnostic::import(
                codes::MODULE_NOT_FOUND,
                format!("cannot find module '{}'", specifier.value),
            )
            .with_span(specifier.span)
            .with_help(format!("looked for {}", looked))
            .build());
        };

        if let Some(module) = self.modules.get(&path) {
            debug!(path = %path.display(), "module cache hit");
            return Ok(module);
        }
        if self.modules.is_loading(&path) {
            let chain = self
                .modules
                .cycle(&path)
                .iter()
                .map(|p| display_name(p))
                .collect::<Vec<_>>()
                .join(" -> ");
            debug!(chain = %chain, "import cycle");
            return Err(Diagnostic::import(
                codes::CIRCULAR_IMPORT,
                format!("circular import: {}", chain),
            )
            .with_span(specifier.span)
            .with_help("move the shared declarations into a module that neither file imports")
            .build());
        }

        let file = path.display().to_string();
        debug!(path = %file, "loading module");
        let source = std::fs::read_to_string(&path).map_err(|e| {
            Diagnostic::import(
                codes::MODULE_NOT_FOUND,
                format!("cannot read module '{}': {}", specifier.value, e),
            )
            .with_span(specifier.span)
            .build()
        })?;
        let tokens = Lexer::new(&source).with_file(file.as_str()).tokenize()?;
        let program = parser::parse(tokens, file.as_str())?;

        let env = self.envs.child(&self.globals);
        self.modules.enter(path.clone());
        let previous = std::mem::replace(&mut self.current_file, Rc::from(file.as_str()));
        let result = self.execute_program(&program, &env);
        self.current_file = previous;
        self.modules.leave(&path);
        result.map_err(|error| error.in_file(&file))?;

        let exports = self
            .envs
            .public_bindings(&env)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        let module = Rc::new(Module {
            path,
            program,
            env,
            exports,
        });
        self.modules.insert(module.clone());
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::diagnostics::ErrorClass;
    use crate::stdlib::CapturedConsole;

    fn write(dir: &Path, name: &str, source: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, source).unwrap();
        path
    }

    fn run_file(path: &Path) -> (Result<(), Diagnostic>, String) {
        let console = CapturedConsole::new();
        let mut interpreter = Interpreter::new().with_console(Box::new(console.clone()));
        let result = interpreter.run_file(path).map(|_| ());
        (result, console.output())
    }

    #[test]
    fn test_candidates() {
        assert_eq!(
            candidates("src/main.lapis", "lib/util"),
            vec![PathBuf::from("src/lib/util.lapis"), PathBuf::from("src/lib/util")]
        );
        assert_eq!(candidates("main.lapis", "util.lapis"), vec![PathBuf::from("./util.lapis")]);
    }

    #[test]
    fn test_import_public_symbols() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "math.lapis",
            r#"
            public func square(n) return n * n; end
            public var TAU = 6.28;
            "#,
        );
        let main = write(
            dir.path(),
            "main.lapis",
            r#"
            package "math" use square, TAU;
            Console.print(square(4), TAU);
            "#,
        );
        let (result, output) = run_file(&main);
        result.unwrap();
        assert_eq!(output, "16 6.28\n");
    }

    #[test]
    fn test_import_without_use_brings_all_public_symbols() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "greet.lapis",
            r#"
            public func hello(name) return "hello " + name; end
            func secret() return 1; end
            "#,
        );
        let main = write(
            dir.path(),
            "main.lapis",
            r#"
            package "greet.lapis";
            Console.print(hello("you"));
            secret();
            "#,
        );
        let (result, output) = run_file(&main);
        assert_eq!(output, "hello you\n");
        assert_eq!(result.unwrap_err().code, codes::UNDEFINED_VARIABLE);
    }

    #[test]
    fn test_private_symbol_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib.lapis", "func helper() return 1; end");
        let main = write(dir.path(), "main.lapis", r#"package "lib" use helper;"#);
        let (result, _) = run_file(&main);
        let err = result.unwrap_err();
        assert_eq!(err.code, codes::SYMBOL_NOT_PUBLIC);
        assert_eq!(err.class, ErrorClass::Import);
        assert!(err.file.ends_with("main.lapis"));
    }

    #[test]
    fn test_missing_symbol_and_module() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib.lapis", "public var a = 1;");
        let main = write(dir.path(), "main.lapis", r#"package "lib" use b;"#);
        let err = run_file(&main).0.unwrap_err();
        assert_eq!(err.code, codes::SYMBOL_NOT_FOUND);
        assert_eq!(err.help.as_deref(), Some("public symbols are: a"));

        let main = write(dir.path(), "other.lapis", r#"package "nowhere" use b;"#);
        let err = run_file(&main).0.unwrap_err();
        assert_eq!(err.code, codes::MODULE_NOT_FOUND);
    }

    #[test]
    fn test_modules_load_once() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "shared.lapis",
            r#"
            Console.print("loading shared");
            public var items = [];
            "#,
        );
        write(
            dir.path(),
            "left.lapis",
            r#"
            package "shared" use items;
            public func add(x) items.push(x); end
            "#,
        );
        let main = write(
            dir.path(),
            "main.lapis",
            r#"
            package "left" use add;
            package "shared" use items;
            add(1);
            add(2);
            Console.print(items);
            "#,
        );
        let (result, output) = run_file(&main);
        result.unwrap();
        assert_eq!(output, "loading shared\n[1, 2]\n");
    }

    #[test]
    fn test_circular_import() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.lapis", r#"package "b" use y; public var x = 1;"#);
        write(dir.path(), "b.lapis", r#"package "a" use x; public var y = 2;"#);
        let main = write(dir.path(), "main.lapis", r#"package "a" use x;"#);
        let err = run_file(&main).0.unwrap_err();
        assert_eq!(err.code, codes::CIRCULAR_IMPORT);
        assert_eq!(err.message, "circular import: a.lapis -> b.lapis -> a.lapis");
        assert!(err.file.ends_with("b.lapis"));
    }

    #[test]
    fn test_importing_the_running_script_is_circular() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(dir.path(), "main.lapis", r#"package "main" use x;"#);
        let err = run_file(&main).0.unwrap_err();
        assert_eq!(err.code, codes::CIRCULAR_IMPORT);
    }

    #[test]
    fn test_errors_report_the_module_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.lapis", "public func f() return 1 / 0; end");
        let main = write(
            dir.path(),
            "main.lapis",
            r#"
            package "broken" use f;
            f();
            "#,
        );
        let err = run_file(&main).0.unwrap_err();
        assert_eq!(err.code, codes::DIVISION_BY_ZERO);
        assert!(err.file.ends_with("broken.lapis"));
    }
}
