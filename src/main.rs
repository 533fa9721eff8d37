use std::process;
use std::time::Instant;

use clap::Parser;
use flexi_logger::Logger;

use sokofess::{Board, DEFAULT_ZOBRIST_SEED, Levels, Push, SolveOptions, SolveResult, State};

#[derive(Parser)]
#[command(name = "sokofess")]
#[command(about = "A FESS-based Sokoban solver", long_about = None)]
struct Args {
    /// Path to the levels file (XSB format)
    #[arg(value_name = "FILE")]
    levels_file: String,

    /// Level number to solve (1-indexed)
    #[arg(value_name = "LEVEL", default_value = "1")]
    level: usize,

    /// Print the solution step-by-step
    #[arg(short, long)]
    print_solution: bool,

    /// Maximum number of search nodes before giving up
    #[arg(short = 'n', long, default_value = "2000000")]
    max_nodes: usize,

    /// Wall-clock budget in milliseconds
    #[arg(short = 'm', long, default_value = "600000")]
    max_ms: u64,

    /// Disable corral deadlock detection
    #[arg(long, default_value = "false")]
    no_corral: bool,

    /// Disable bipartite deadlock detection
    #[arg(long, default_value = "false")]
    no_bipartite: bool,

    /// Seed for the Zobrist hash tables
    #[arg(short, long)]
    seed: Option<u64>,

    /// Log level filter (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn print_solution(board: &Board, solution: &[Push]) {
    let mut state = State::initial(board);
    println!(
        "\nStarting position:\n{}",
        board.render(state.box_positions(), state.player())
    );
    let total = solution.len();
    for (count, push) in solution.iter().enumerate() {
        state.push(board, push.from, push.dir);
        println!(
            "Push {} {} ({}/{}):\n{}",
            push.from,
            push.dir,
            count + 1,
            total,
            board.render(state.box_positions(), state.player())
        );
    }
}

fn main() {
    let args = Args::parse();

    let _logger = Logger::try_with_env_or_str(&args.log_level)
        .and_then(|logger| logger.log_to_stderr().start());

    // Load levels from file
    let levels = match Levels::from_file(&args.levels_file) {
        Ok(levels) => levels,
        Err(e) => {
            eprintln!("Error loading levels: {}", e);
            process::exit(3);
        }
    };

    if args.level == 0 || args.level > levels.len() {
        eprintln!(
            "Error: level {} not found (file contains {} levels)",
            args.level,
            levels.len()
        );
        process::exit(3);
    }
    let board = levels.get(args.level - 1).unwrap();

    let options = SolveOptions {
        max_nodes: args.max_nodes,
        max_millis: args.max_ms,
        enable_corral_check: !args.no_corral,
        enable_bipartite_check: !args.no_bipartite,
        zobrist_seed: args.seed.unwrap_or(DEFAULT_ZOBRIST_SEED),
        ..SolveOptions::default()
    };

    let start = Instant::now();
    let result = sokofess::solve_board(board, options);
    let elapsed_ms = start.elapsed().as_millis();

    let stats = result.stats();
    let (solved_char, steps) = match &result {
        SolveResult::Solved { moves, .. } => ('Y', moves.len()),
        SolveResult::Unsolvable { .. } => ('X', 0),
        SolveResult::LimitExceeded { .. } => ('N', 0),
        SolveResult::Cancelled { .. } => ('C', 0),
    };
    println!(
        "level: {:<3}  solved: {}  steps: {:<5}  expanded: {:<10}  generated: {:<10}  elapsed: {} ms",
        args.level, solved_char, steps, stats.nodes_expanded, stats.nodes_generated, elapsed_ms
    );

    match result {
        SolveResult::Solved { moves, .. } => {
            if args.print_solution {
                print_solution(board, &moves);
            }
            process::exit(0);
        }
        SolveResult::Unsolvable { .. } => process::exit(1),
        SolveResult::LimitExceeded { .. } => process::exit(2),
        SolveResult::Cancelled { .. } => process::exit(4),
    }
}
