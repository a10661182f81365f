//! Tree-walking interpreter for the Lapis language.
//!
//! Statements evaluate to a [`Flow`] that carries `return`, `break` and
//! `continue` outward; errors travel separately as `Err(Diagnostic)`.

mod expressions;
pub mod methods;
mod operators;
mod statements;

use std::path::Path;
use std::rc::Rc;

use tracing::debug;

use crate::ast::{Program, Visibility};
use crate::config::InterpreterConfig;
use crate::diagnostics::{codes, Diagnostic};
use crate::environment::{Env, Environments};
use crate::lexer::Lexer;
use crate::module::ModuleCache;
use crate::parser;
use crate::span::Span;
use crate::stdlib::{
    ConsoleIo, ConsoleLibrary, ForeignBridge, Library, LibraryRegistry, ProcessBridge,
};
use crate::value::{Class, Function, Instance, NativeFunction, Value};

/// Name of the global through which programs reach the foreign-call bridge.
pub const NATIVE_CALL: &str = "__native_call";

/// How a statement finished.
#[derive(Debug)]
pub enum Flow {
    Normal,
    Return(Value),
    Break(Span),
    Continue(Span),
}

impl Flow {
    /// The value of a function body or module that finished with this flow.
    /// Loop control may not escape either.
    fn into_value(self) -> Result<Value, Diagnostic> {
        match self {
            Flow::Normal => Ok(Value::Null),
            Flow::Return(value) => Ok(value),
            Flow::Break(span) => Err(loop_control_outside_loop("break", span)),
            Flow::Continue(span) => Err(loop_control_outside_loop("continue", span)),
        }
    }
}

fn loop_control_outside_loop(keyword: &str, span: Span) -> Diagnostic {
    Diagnostic::access(
        codes::LOOP_CONTROL_OUTSIDE_LOOP,
        format!("'{}' outside of a loop", keyword),
    )
    .with_span(span)
    .with_help("break and continue may only be used inside a while or for loop in the same function")
    .build()
}

/// The Lapis interpreter.
pub struct Interpreter {
    pub(crate) envs: Environments,
    pub(crate) globals: Env,
    main: Env,
    libraries: LibraryRegistry,
    bridge: Option<Box<dyn ForeignBridge>>,
    pub(crate) modules: ModuleCache,
    config: InterpreterConfig,
    depth: usize,
    /// File whose code is executing, recorded on functions defined there
    pub(crate) current_file: Rc<str>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Create a new interpreter with the default configuration.
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        let envs = Environments::new();
        let globals = envs.root();
        let main = envs.child(&globals);
        let bridge = config
            .bridge
            .clone()
            .map(|bridge| Box::new(ProcessBridge::new(bridge)) as Box<dyn ForeignBridge>);
        let mut interpreter = Self {
            envs,
            globals,
            main,
            libraries: LibraryRegistry::new(),
            bridge,
            modules: ModuleCache::default(),
            config,
            depth: 0,
            current_file: Rc::from("<input>"),
        };
        for name in interpreter.libraries.names() {
            interpreter.define_global(name, Value::Library(name.into()));
        }
        interpreter.define_global(NATIVE_CALL, Value::Native(Rc::new(NativeFunction::ForeignCall)));
        interpreter
    }

    /// Route `Console` input and output through `console`.
    pub fn with_console(mut self, console: Box<dyn ConsoleIo>) -> Self {
        self.libraries.register(Box::new(ConsoleLibrary::new(console)));
        self
    }

    /// Serve `__native_call` with `bridge`.
    pub fn with_bridge(mut self, bridge: Box<dyn ForeignBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Register an additional library and expose it as a global.
    pub fn register_library(&mut self, library: Box<dyn Library>) {
        let name = library.name();
        self.libraries.register(library);
        self.define_global(name, Value::Library(name.into()));
    }

    fn define_global(&mut self, name: &str, value: Value) {
        self.envs.define(&self.globals, name, value, Visibility::Private);
    }

    /// Look up a name in the top-level scope of the main program.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.envs.lookup(&self.main, name)
    }

    /// Lex, parse and run `source` in the main program scope. State persists
    /// between calls, which is what the REPL relies on.
    pub fn run_source(&mut self, source: &str, file: &str) -> Result<Value, Diagnostic> {
        let tokens = Lexer::new(source).with_file(file).tokenize()?;
        let program = parser::parse(tokens, file)?;
        self.run_program(&program, file)
    }

    /// Run an already parsed program in the main program scope. Returns the
    /// value of a top-level `return`, or else of a trailing expression
    /// statement.
    pub fn run_program(&mut self, program: &Program, file: &str) -> Result<Value, Diagnostic> {
        debug!(file, statements = program.statements.len(), "running program");
        let previous = std::mem::replace(&mut self.current_file, Rc::from(file));
        let main = self.main.clone();
        let result = self
            .execute_program(program, &main)
            .map_err(|error| error.in_file(file));
        self.current_file = previous;
        self.envs.collect_cycles();
        debug!(file, ok = result.is_ok(), "program finished");
        result
    }

    /// Run a script file. Imports resolve relative to its directory.
    pub fn run_file(&mut self, path: &Path) -> Result<Value, Diagnostic> {
        let file = path.display().to_string();
        let source = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::import(codes::MODULE_NOT_FOUND, format!("cannot read '{}': {}", file, e))
                .with_file(&file)
                .build()
        })?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.modules.enter(canonical.clone());
        let result = self.run_source(&source, &file);
        self.modules.leave(&canonical);
        result
    }

    /// Call a callable value from the host.
    pub fn call(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, Diagnostic> {
        self.call_value(callee, args, Span::default())
    }

    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, Diagnostic> {
        match callee {
            Value::Function(function) => self.call_function(function, args, span),
            Value::Native(native) => self.call_native(native, args, span),
            Value::Class(class) => self.instantiate(class, args, span),
            other => Err(Diagnostic::type_error(
                codes::NOT_CALLABLE,
                format!("{} is not callable", describe(other)),
            )
            .with_span(span)
            .build()),
        }
    }

    fn call_function(
        &mut self,
        function: &Rc<Function>,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, Diagnostic> {
        let declaration = &function.declaration;
        let fixed = declaration.fixed_params();
        let arity_ok = if declaration.variadic {
            args.len() >= fixed.len()
        } else {
            args.len() == fixed.len()
        };
        if !arity_ok {
            let expected = if declaration.variadic {
                format!("at least {}", fixed.len())
            } else {
                fixed.len().to_string()
            };
            return Err(Diagnostic::type_error(
                codes::ARITY_MISMATCH,
                format!(
                    "function '{}' expects {} argument{} but got {}",
                    function.name(),
                    expected,
                    if fixed.len() == 1 && !declaration.variadic { "" } else { "s" },
                    args.len()
                ),
            )
            .with_span(span)
            .with_label(declaration.name.span, "defined here")
            .build()
            .in_file(&function.file));
        }
        if self.depth >= self.config.max_call_depth {
            return Err(Diagnostic::runtime(
                codes::STACK_OVERFLOW,
                format!(
                    "stack overflow: more than {} nested calls",
                    self.config.max_call_depth
                ),
            )
            .with_span(span)
            .with_help("check for recursion without a base case")
            .build());
        }

        let env = self.envs.child(&function.closure);
        let mut args = args.into_iter();
        for param in fixed {
            let value = args.next().unwrap_or(Value::Null);
            self.envs.define(&env, &param.name, value, Visibility::Private);
        }
        if declaration.variadic {
            if let Some(collector) = declaration.params.last() {
                let rest = Value::array(args.collect());
                self.envs.define(&env, &collector.name, rest, Visibility::Private);
            }
        }

        self.depth += 1;
        let previous_file = std::mem::replace(&mut self.current_file, function.file.clone());
        let outcome = self.execute_statements(&declaration.body, &env);
        self.current_file = previous_file;
        self.depth -= 1;

        outcome
            .and_then(Flow::into_value)
            .map_err(|error| error.in_file(&function.file))
    }

    /// Bind `this` for a method of `instance`.
    pub(crate) fn bind_method(&mut self, method: &Rc<Function>, instance: Value) -> Rc<Function> {
        let env = self.envs.child(&method.closure);
        self.envs.define(&env, "this", instance, Visibility::Private);
        Rc::new(Function {
            declaration: method.declaration.clone(),
            closure: env,
            file: method.file.clone(),
        })
    }

    fn instantiate(
        &mut self,
        class: &Rc<Class>,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, Diagnostic> {
        let instance = Value::Instance(Rc::new(Instance::new(class.clone())));
        match class.methods.get("init") {
            Some(init) => {
                let bound = self.bind_method(init, instance.clone());
                self.call_function(&bound, args, span)?;
            }
            None if !args.is_empty() => {
                return Err(Diagnostic::type_error(
                    codes::ARITY_MISMATCH,
                    format!(
                        "class '{}' has no init method and takes no arguments, but got {}",
                        class.name,
                        args.len()
                    ),
                )
                .with_span(span)
                .build());
            }
            None => {}
        }
        Ok(instance)
    }

    fn call_native(
        &mut self,
        native: &NativeFunction,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, Diagnostic> {
        match native {
            NativeFunction::Library { library, function } => self
                .libraries
                .call(library, function, args)
                .map_err(|error| error.into_diagnostic(span)),
            NativeFunction::Method { receiver, method } => {
                self.call_method(receiver, *method, args, span)
            }
            NativeFunction::ForeignCall => self.foreign_call(args, span),
        }
    }

    /// `__native_call(module, function, args...)`. A single array argument
    /// after the names is spread into the argument list.
    fn foreign_call(&mut self, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
        let foreign_error = |message: String| {
            Diagnostic::runtime(codes::FOREIGN_CALL, message)
                .with_span(span)
                .build()
        };
        let (module, function, rest) = match args.as_slice() {
            [Value::String(module), Value::String(function), rest @ ..] => {
                (module.clone(), function.clone(), rest)
            }
            _ => {
                return Err(foreign_error(format!(
                    "{}() expects a module name and a function name",
                    NATIVE_CALL
                )))
            }
        };
        let call_args = match rest {
            [Value::Array(items)] => items.borrow().clone(),
            _ => rest.to_vec(),
        };
        let Some(bridge) = self.bridge.as_mut() else {
            return Err(foreign_error(format!(
                "cannot call {}.{}: no foreign-call bridge is configured",
                module, function
            )));
        };
        debug!(module = %module, function = %function, "foreign call");
        bridge
            .call(&module, &function, &call_args)
            .map_err(|error| foreign_error(error.to_string()))
    }

    /// Resolve `name` on a library global, e.g. `Console.print`.
    pub(crate) fn library_function(&self, library: &Rc<str>, name: &str) -> Option<Value> {
        self.libraries.function(library, name).map(|function| {
            Value::Native(Rc::new(NativeFunction::Library {
                library: library.clone(),
                function,
            }))
        })
    }
}

/// A value named by its type, or by its name for named callables.
pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Function(function) => format!("function '{}'", function.name()),
        Value::Class(class) => format!("class '{}'", class.name),
        Value::Library(name) => format!("module '{}'", name),
        other => format!("a value of type {}", other.type_name()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::diagnostics::ErrorClass;
    use crate::stdlib::{BridgeError, CapturedConsole};

    /// Run `source` on a thread with room for deep recursion, returning the
    /// console output or the failing diagnostic.
    pub(crate) fn run(source: &str) -> Result<String, Diagnostic> {
        let source = source.to_string();
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(move || {
                let console = CapturedConsole::new();
                let mut interpreter = Interpreter::new().with_console(Box::new(console.clone()));
                interpreter.run_source(&source, "test.lapis")?;
                Ok(console.output())
            })
            .unwrap()
            .join()
            .unwrap()
    }

    pub(crate) fn run_err(source: &str) -> Diagnostic {
        match run(source) {
            Ok(output) => panic!("expected an error, got output {:?}", output),
            Err(diagnostic) => diagnostic,
        }
    }

    #[test]
    fn test_lexical_scoping_uses_the_closure() {
        let output = run(r#"
            var x = "global";
            func show()
                Console.print(x);
            end
            func caller()
                var x = "local";
                show();
            end
            caller();
        "#)
        .unwrap();
        assert_eq!(output, "global\n");
    }

    #[test]
    fn test_arity_is_checked() {
        let err = run_err("func f(a, b) return a; end f(1);");
        assert_eq!(err.code, codes::ARITY_MISMATCH);
        assert_eq!(err.message, "function 'f' expects 2 arguments but got 1");
        assert_eq!(err.class, ErrorClass::Type);
    }

    #[test]
    fn test_variadic_collects_rest() {
        let output = run(r#"
            func greet_all(greeting, names**)
                Console.print(greeting, names, names.length());
            end
            greet_all("Hi", "Alice", "Bob");
            greet_all("Yo");
        "#)
        .unwrap();
        assert_eq!(output, "Hi [Alice, Bob] 2\nYo [] 0\n");
    }

    #[test]
    fn test_runaway_recursion_is_a_stack_overflow() {
        let err = run_err("func down(n) return down(n + 1); end down(0);");
        assert_eq!(err.code, codes::STACK_OVERFLOW);
        assert!(err.is_catchable());
    }

    #[test]
    fn test_stack_overflow_on_an_ordinary_thread() {
        // no big-stack thread: the limit must be reached before the host stack runs out
        let mut interpreter = Interpreter::new().with_console(Box::new(CapturedConsole::new()));
        let err = interpreter
            .run_source("func down(n) return down(n + 1); end down(0);", "test.lapis")
            .unwrap_err();
        assert_eq!(err.code, codes::STACK_OVERFLOW);

        let nested = format!("{}1;", "- ".repeat(2000));
        let value = interpreter.run_source(&nested, "test.lapis").unwrap();
        assert_eq!(value, Value::Number(1.0));
    }

    #[test]
    fn test_nested_function_frames_are_released() {
        let mut interpreter = Interpreter::new().with_console(Box::new(CapturedConsole::new()));
        interpreter
            .run_source(
                "func outer() func inner() return 1; end return inner(); end outer();",
                "test.lapis",
            )
            .unwrap();
        let before = interpreter.envs.live_frames();

        let total = interpreter
            .run_source(
                r#"
                var total = 0;
                var i = 0;
                while (i < 3000)
                    total = total + outer();
                    i++;
                end
                total;
                "#,
                "test.lapis",
            )
            .unwrap();
        assert_eq!(total, Value::Number(3000.0));
        assert_eq!(interpreter.envs.live_frames(), before);
    }

    #[test]
    fn test_reachable_closures_survive_collection() {
        let console = CapturedConsole::new();
        let mut interpreter = Interpreter::new().with_console(Box::new(console.clone()));
        interpreter
            .run_source(
                r#"
                func make_counter()
                    var count = 0;
                    func inc() count++; return count; end
                    return inc;
                end
                var counters = [];
                var i = 0;
                while (i < 2000)
                    counters.push(make_counter());
                    i++;
                end
                counters[0]();
                counters[0]();
                "#,
                "test.lapis",
            )
            .unwrap();
        assert_eq!(interpreter.envs.collect_cycles(), 0);
        interpreter
            .run_source("Console.print(counters[0](), counters[1999]());", "test.lapis")
            .unwrap();
        assert_eq!(console.output(), "3 1\n");
    }

    #[test]
    fn test_depth_recovers_after_overflow() {
        let output = run(r#"
            func down(n) return down(n + 1); end
            try
                down(0);
            catch (e)
                Console.print("caught");
            end
            func up(n)
                if (n == 0) return 0; end
                return 1 + up(n - 1);
            end
            Console.print(up(100));
        "#)
        .unwrap();
        assert_eq!(output, "caught\n100\n");
    }

    #[test]
    fn test_class_without_init_rejects_arguments() {
        let err = run_err("class Point end var p = Point(1);");
        assert_eq!(err.code, codes::ARITY_MISMATCH);
    }

    #[test]
    fn test_foreign_call_without_bridge() {
        let err = run_err(r#"__native_call("math", "add", 1, 2);"#);
        assert_eq!(err.code, codes::FOREIGN_CALL);
        assert!(err.message.contains("no foreign-call bridge"));
    }

    struct EchoBridge;

    impl ForeignBridge for EchoBridge {
        fn call(&mut self, module: &str, function: &str, args: &[Value]) -> Result<Value, BridgeError> {
            if function == "fail" {
                return Err(BridgeError::Protocol("nope".to_string()));
            }
            Ok(Value::from(format!("{}.{}{:?}", module, function, args)))
        }
    }

    #[test]
    fn test_foreign_call_spreads_a_single_array() {
        let console = CapturedConsole::new();
        let mut interpreter = Interpreter::new()
            .with_console(Box::new(console.clone()))
            .with_bridge(Box::new(EchoBridge));
        interpreter
            .run_source(
                r#"
                Console.print(__native_call("m", "f", 1, "a"));
                Console.print(__native_call("m", "g", [1, 2]));
                "#,
                "test.lapis",
            )
            .unwrap();
        assert_eq!(console.output(), "m.f[1, \"a\"]\nm.g[1, 2]\n");

        let err = interpreter
            .run_source(r#"__native_call("m", "fail");"#, "test.lapis")
            .unwrap_err();
        assert_eq!(err.code, codes::FOREIGN_CALL);
        assert_eq!(err.message, "invalid bridge response: nope");
    }

    #[test]
    fn test_host_can_call_program_functions() {
        let mut interpreter = Interpreter::new();
        interpreter
            .run_source("func add(a, b) return a + b; end", "test.lapis")
            .unwrap();
        let add = interpreter.get("add").unwrap();
        let sum = interpreter
            .call(&add, vec![Value::Number(2.0), Value::Number(3.0)])
            .unwrap();
        assert_eq!(sum, Value::Number(5.0));
    }

    #[test]
    fn test_state_persists_between_runs() {
        let console = CapturedConsole::new();
        let mut interpreter = Interpreter::new().with_console(Box::new(console.clone()));
        interpreter.run_source("var count = 1;", "<repl>").unwrap();
        interpreter.run_source("count++;", "<repl>").unwrap();
        let value = interpreter.run_source("count * 10;", "<repl>").unwrap();
        assert_eq!(value, Value::Number(20.0));
    }

    #[test]
    fn test_top_level_return_ends_the_program() {
        let mut interpreter = Interpreter::new();
        let value = interpreter
            .run_source("var x = 1; return x + 1; x = 100;", "test.lapis")
            .unwrap();
        assert_eq!(value, Value::Number(2.0));
        assert_eq!(interpreter.get("x"), Some(Value::Number(1.0)));
    }
}
