use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use std::rc::Rc;
use stutter::Error;
use stutter::ast::Value;
use stutter::evaluator::{self, Environment};

fn main() {
    init_tracing();

    let result = panic::catch_unwind(run_repl);

    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            eprintln!("Could not start the REPL: {err}");
            process::exit(1);
        }
        Err(panic_info) => {
            eprintln!("The REPL encountered an unexpected error and must exit.");

            if let Some(msg) = panic_info.downcast_ref::<&str>() {
                eprintln!("Error: {msg}");
            } else if let Some(msg) = panic_info.downcast_ref::<String>() {
                eprintln!("Error: {msg}");
            } else {
                eprintln!("Error: Unknown panic occurred");
            }

            process::exit(1);
        }
    }
}

/// Log to stderr, but only when RUST_LOG is set
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn run_repl() -> Result<(), ReadlineError> {
    println!("stutter - a minimal Lisp interpreter");
    println!("Enter expressions like: (+ 1 (* 2 3))");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let env = evaluator::standard_env();

    // Callable from user code too: (help)
    env.register_builtin_operation::<_, ()>("help", print_help);

    loop {
        match rl.readline("stutter> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        _ = print_help().is_ok();
                        continue;
                    }
                    ":env" => {
                        print_environment(&env);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match stutter::parse(line).and_then(|expr| evaluator::eval(&expr, &env)) {
                    // Don't print Unspecified values (e.g., from define)
                    Ok(Value::Unspecified) => {}
                    Ok(result) => println!("{result}"),
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }

    // User closures hold the global frame; release them before exit
    env.teardown();
    Ok(())
}

fn print_help() -> Result<Value, Error> {
    println!("stutter commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Special forms:");
    println!("  (quote x)  (if test then else)  (define name expr)");
    println!("  (set! name expr)  (lambda (params...) body)");
    println!();
    println!("Examples:");
    println!("  (define square (lambda (x) (* x x)))");
    println!("  (square 12)");
    println!("  (map square (list 1 2 3))");
    println!("  (define fact (lambda (n) (if (<= n 1) 1 (* n (fact (- n 1))))))");
    println!();

    Ok(Value::Unspecified)
}

fn print_environment(env: &Rc<Environment>) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate built-in functions from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::BuiltinFunction { .. } => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        // Print in columns for readability
        for row in builtins.chunks(4) {
            for name in row {
                print!("  {name:<15}");
            }
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
