//! Rindo CLI - コマンドラインインターフェース
//!
//! 停止中のターゲットプロセスに対して式を評価するREPLインターフェース

use anyhow::Result;
use clap::{Parser, Subcommand};
use rindo_core::{parse::parse_address, EmptyFrames, EvalOptions, Session};
use rindo_target::Target;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

/// Rindo - Expression Evaluator for Live Object Runtimes
#[derive(Parser)]
#[command(name = "rindo")]
#[command(version = "0.1.0")]
#[command(about = "Evaluate expressions against a stopped process", long_about = None)]
struct Cli {
    /// Address of the runtime class table in the target (hex or decimal)
    #[arg(long)]
    class_table: String,

    #[command(subcommand)]
    command: DebugCommand,
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Launch and debug an executable
    Run {
        /// Path to the executable binary
        binary: String,

        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Attach to an existing process
    Attach {
        /// Process ID to attach to
        #[arg(short, long)]
        pid: i32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Rindo - Expression Evaluator");
    println!("Version 0.1.0");
    println!();

    let cli = Cli::parse();
    let class_table = parse_address(&cli.class_table)
        .map_err(|e| anyhow::anyhow!("invalid --class-table: {}", e))?;

    let mut session = init_session(cli.command, class_table)?;
    run_repl(&mut session)?;

    Ok(())
}

/// ターゲットを起動またはアタッチしてセッションを作成する
fn init_session(command: DebugCommand, class_table: u64) -> Result<Session> {
    let target = match command {
        DebugCommand::Run { binary, args } => {
            println!("Launching binary: {}", binary);
            let target = Target::spawn(&binary, &args)?;
            println!("Process {} spawned and stopped at first instruction", target.pid());
            println!();
            target
        }
        DebugCommand::Attach { pid } => {
            println!("Attaching to process: {}", pid);
            let target = Target::attach(pid)?;
            println!("Attached to process {}", pid);
            println!();
            target
        }
    };

    // デバッグ情報サービスは未接続のため、変数束縛なしで開始する
    // （クラス名・リテラル・結果スロットを使う式は評価できる）
    Ok(Session::new(
        Box::new(target),
        Box::new(EmptyFrames),
        class_table,
    ))
}

/// REPLループを実行する
fn run_repl(session: &mut Session) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(rindo) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                if let Err(e) = handle_command(session, line) {
                    eprintln!("Error: {}", e);
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

fn handle_command(session: &mut Session, line: &str) -> Result<()> {
    let (command, rest) = match line.split_once(' ') {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    match command {
        "help" => print_help(),
        "quit" | "exit" | "q" => handle_quit(),
        "expression" | "expr" | "e" | "p" => handle_expression(session, rest),
        "type" => handle_type(session, rest),
        "continue" | "c" => handle_continue(session),
        _ => {
            println!("Unknown command: {}", line);
            println!("Type 'help' for available commands.");
        }
    }

    Ok(())
}

/// Quitコマンドを処理する
fn handle_quit() {
    println!("Goodbye!");
    std::process::exit(0);
}

/// Expressionコマンドを処理する
///
/// `--show-types`（ディープダンプ）と`--dynamic`（実行時型でのサマリ表示）を
/// 式本体の前に指定できます。`--`以降は常に式本体として扱います。
fn handle_expression(session: &mut Session, text: &str) {
    let mut options = EvalOptions::default();
    let mut rest = text;

    loop {
        let (head, tail) = match rest.split_once(' ') {
            Some((head, tail)) => (head, tail.trim_start()),
            None => (rest, ""),
        };
        match head {
            "--show-types" => options.show_types = true,
            "--dynamic" => options.prefer_dynamic = true,
            "--" => {
                rest = tail;
                break;
            }
            _ => break,
        }
        rest = tail;
    }

    if rest.is_empty() {
        println!("Usage: expression [--show-types] [--dynamic] [--] <expr>");
        return;
    }

    match session.evaluate(rest, &options) {
        Ok(result) => match result.outcome {
            Ok(evaluated) => println!("{}", evaluated.display),
            Err(failure) => println!("Error ({}): {}", failure.stage, failure.error),
        },
        Err(e) => println!("Error: {}", e),
    }
}

/// Typeコマンドを処理する
fn handle_type(session: &mut Session, name: &str) {
    if name.is_empty() {
        println!("Usage: type <name>");
        return;
    }

    match session.lookup_type(name) {
        Ok(class) => {
            println!("class {} @ 0x{:x}", class.name, class.address);
            if let Some(super_addr) = class.super_address {
                println!("  superclass @ 0x{:x}", super_addr);
            }
            for field in &class.fields {
                println!("  field  {} : {} (offset 0x{:x})", field.name, field.ty, field.offset);
            }
            for method in &class.methods {
                println!(
                    "  method {} -> {} ({} args)",
                    method.selector, method.return_type, method.selector.arity
                );
            }
        }
        Err(e) => println!("Error: {}", e),
    }
}

/// Continueコマンドを処理する
fn handle_continue(session: &mut Session) {
    println!("Continuing execution...");
    match session.continue_process() {
        Ok(()) => {
            println!("Process stopped");
            println!("Stored result slots are now stale; cached type metadata was discarded");
        }
        Err(e) => println!("Error: {}", e),
    }
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help             - Show this help message");
    println!("  quit/exit/q      - Exit the debugger");
    println!();
    println!("Evaluation commands:");
    println!("  expression <e>   - Evaluate an expression (aliases: expr, e, p)");
    println!("    --show-types   - Deep-dump the result across its inheritance chain");
    println!("    --dynamic      - Prefer the runtime type in the summary");
    println!("  type <name>      - Show runtime metadata for a class");
    println!("  continue (c)     - Continue execution until the next stop");
    println!();
    println!("Examples:");
    println!("  expression (int)[str length]");
    println!("  expression --show-types -- *my");
    println!("  expression [String stringWithCString: \"new\"]");
    println!("  type Derived");
}
