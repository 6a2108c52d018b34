use lispet::symbols::Symbol;
use lispet::{read_many, Lisp};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::panic;
use std::process;

fn main() {
    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
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

fn run_repl() {
    println!("lispet - a small Lisp interpreter");
    println!("Enter expressions like: (defun fact (n) (if (eq n 0) 1 (* n (fact (- n 1)))))");
    println!("Type :help for commands, or Ctrl+C to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Could not initialize the line editor: {e}");
            process::exit(1);
        }
    };
    let mut lisp = Lisp::new();

    loop {
        match rl.readline("lispet> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":symbols" => {
                        print_symbols(&lisp);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                // A line may hold several top-level forms; evaluate each
                // and report per form.
                match read_many(line, lisp.symbols()) {
                    Ok(forms) => {
                        for form in &forms {
                            match lisp.eval_expr(form) {
                                Ok(value) => println!("{value}"),
                                Err(e) => println!("Error: {e}"),
                            }
                        }
                    }
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :help     - Show this help message");
    println!("  :symbols  - List interned symbols with global bindings");
    println!("  :quit     - Exit the interpreter");
    println!("  :exit     - Exit the interpreter");
    println!("  Ctrl+C    - Exit the interpreter");
    println!();
    println!("The language:");
    println!("  Numbers: 42, -5      Strings: \"hello\"     Lists: (1 2 3), (1 . 2)");
    println!("  NIL is false and the empty list; everything else is true.");
    println!("  Special forms: quote if cond while and or progn setq let let* flet");
    println!("                 lambda fn nlambda macro defun defmacro function");
    println!("                 catch unclosure backquote");
    println!("  Shorthands: 'x  `x  ,x  ,@x  #f  #'f");
    println!();
    println!("Examples:");
    println!("  (defun fact (n) (if (eq n 0) 1 (* n (fact (- n 1)))))");
    println!("  (fact 10)");
    println!("  (defmacro twice (x) `(+ ,x ,x))");
    println!("  (catch 'tag (throw 'tag 99))");
    println!();
}

fn print_symbols(lisp: &Lisp) {
    let symbols = lisp.symbols().all();

    let with_value: Vec<&Symbol> = symbols.iter().filter(|s| s.global_value().is_some()).collect();
    let with_function: Vec<&Symbol> = symbols
        .iter()
        .filter(|s| s.global_function().is_some())
        .collect();

    println!("Interned symbols: {} total", symbols.len());
    println!();

    if !with_function.is_empty() {
        println!("Function bindings ({}):", with_function.len());
        let mut col = 0;
        for sym in &with_function {
            print!("  {:<15}", sym.name());
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !with_value.is_empty() {
        println!("Value bindings ({}):", with_value.len());
        for sym in &with_value {
            match sym.global_value() {
                Some(v) => println!("  {} = {v}", sym.name()),
                None => {}
            }
        }
    }
}
