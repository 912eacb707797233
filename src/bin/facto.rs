//! Command-line wrapper around the solver.
//!
//! Usage:
//! - `facto train [options] <train-file> [model-file]`
//! - `facto predict <test-file> <model-file> [output-file]`
//!
//! Exit codes: 0 success, 1 I/O error, 2 malformed input or options,
//! 3 allocation failure.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use facto_rs::{cross_validate, Error, Predictor, Problem, TrainParams, Trainer};

#[derive(Debug)]
struct TrainArgs {
    params: TrainParams,
    nr_folds: Option<u32>,
    va_path: Option<PathBuf>,
    out_p: Option<PathBuf>,
    out_q: Option<PathBuf>,
    train_path: PathBuf,
    model_path: Option<PathBuf>,
}

fn print_help_and_exit() -> ! {
    eprintln!(
        "facto\n\n\
         facto train [options] <train-file> [model-file]\n\
         \x20 --k <n>          latent factors (default 8)\n\
         \x20 --threads <n>    worker threads (default 1)\n\
         \x20 --bins <n>       grid side, raised to 2*threads (default 20)\n\
         \x20 --iters <n>      epochs (default 20)\n\
         \x20 --lambda <f>     L2 regularization (default 0.1)\n\
         \x20 --eta <f>        learning rate (default 0.1)\n\
         \x20 --alpha <f>      implicit confidence scale (default 40)\n\
         \x20 --nmf            nonnegative factors\n\
         \x20 --implicit      implicit-feedback loss\n\
         \x20 --quiet          suppress the per-epoch report\n\
         \x20 --seed <u64>     RNG seed (default 0)\n\
         \x20 --va <file>      validation triples, RMSE reported per epoch\n\
         \x20 --cv <folds>     cross-validate instead of saving a model (default folds 5)\n\
         \x20 --out-p <file>   export user factors, one row per user\n\
         \x20 --out-q <file>   export item factors, one row per item\n\n\
         facto predict <test-file> <model-file> [output-file]\n"
    );
    std::process::exit(0)
}

fn arg_error(msg: &str) -> Error {
    Error::InvalidInput(msg.to_string())
}

fn parse_train_args(mut it: std::env::Args) -> Result<TrainArgs, Error> {
    let mut params = TrainParams::default();
    let mut nr_folds = None;
    let mut va_path = None;
    let mut out_p = None;
    let mut out_q = None;
    let mut positional: Vec<PathBuf> = Vec::new();

    let mut value = |it: &mut std::env::Args, flag: &str| {
        it.next()
            .ok_or_else(|| arg_error(&format!("{flag} requires a value")))
    };

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--k" => params.k = parse_num(&value(&mut it, "--k")?, "--k")?,
            "--threads" => params.nr_threads = parse_num(&value(&mut it, "--threads")?, "--threads")?,
            "--bins" => params.nr_bins = parse_num(&value(&mut it, "--bins")?, "--bins")?,
            "--iters" => params.nr_iters = parse_num(&value(&mut it, "--iters")?, "--iters")?,
            "--lambda" => params.lambda = parse_num(&value(&mut it, "--lambda")?, "--lambda")?,
            "--eta" => params.eta = parse_num(&value(&mut it, "--eta")?, "--eta")?,
            "--alpha" => params.alpha = parse_num(&value(&mut it, "--alpha")?, "--alpha")?,
            "--seed" => params.seed = parse_num(&value(&mut it, "--seed")?, "--seed")?,
            "--nmf" => params.do_nmf = true,
            "--implicit" => params.do_implicit = true,
            "--quiet" => params.quiet = true,
            "--cv" => nr_folds = Some(parse_num(&value(&mut it, "--cv")?, "--cv")?),
            "--va" => va_path = Some(PathBuf::from(value(&mut it, "--va")?)),
            "--out-p" => out_p = Some(PathBuf::from(value(&mut it, "--out-p")?)),
            "--out-q" => out_q = Some(PathBuf::from(value(&mut it, "--out-q")?)),
            "--help" => print_help_and_exit(),
            other if other.starts_with("--") => {
                return Err(arg_error(&format!("unknown option {other}")));
            }
            other => positional.push(PathBuf::from(other)),
        }
    }

    let mut positional = positional.into_iter();
    let train_path = positional
        .next()
        .ok_or_else(|| arg_error("missing train file"))?;
    let model_path = positional.next();

    Ok(TrainArgs {
        params,
        nr_folds,
        va_path,
        out_p,
        out_q,
        train_path,
        model_path,
    })
}

fn parse_num<T: std::str::FromStr>(text: &str, flag: &str) -> Result<T, Error> {
    text.parse()
        .map_err(|_| arg_error(&format!("{flag}: cannot parse {text:?}")))
}

fn read_problem(path: &PathBuf) -> Result<Problem, Error> {
    let file = File::open(path)?;
    Problem::from_reader(BufReader::new(file))
}

fn run_train(it: std::env::Args) -> Result<(), Error> {
    let args = parse_train_args(it)?;
    let mut tr = read_problem(&args.train_path)?;

    if let Some(folds) = args.nr_folds {
        let folds = if folds == 0 { 5 } else { folds };
        cross_validate(&tr, folds, &args.params)?;
        return Ok(());
    }

    let mut va = match &args.va_path {
        Some(path) => Some(read_problem(path)?),
        None => None,
    };

    let trainer = Trainer::new(args.params);
    let model = trainer.train(&mut tr, va.as_mut())?;

    if let Some(path) = &args.model_path {
        let mut w = BufWriter::new(File::create(path)?);
        facto_rs::save_model(&model, &mut w)?;
        w.flush().map_err(Error::Io)?;
    }
    if let Some(path) = &args.out_p {
        model.write_p_factors(BufWriter::new(File::create(path)?))?;
    }
    if let Some(path) = &args.out_q {
        model.write_q_factors(BufWriter::new(File::create(path)?))?;
    }
    Ok(())
}

fn run_predict(mut it: std::env::Args) -> Result<(), Error> {
    let test_path = it
        .next()
        .ok_or_else(|| arg_error("missing test file"))?;
    let model_path = it
        .next()
        .ok_or_else(|| arg_error("missing model file"))?;
    let out_path = it.next();

    let model = facto_rs::load_model(BufReader::new(File::open(&model_path)?))?;
    let predictor = Predictor::new(&model);
    let input = BufReader::new(File::open(&test_path)?);

    let summary = match out_path {
        Some(path) => {
            let mut w = BufWriter::new(File::create(&path)?);
            let summary = predictor.predict_stream(input, &mut w)?;
            w.flush().map_err(Error::Io)?;
            summary
        }
        None => predictor.predict_stream(input, io::stdout().lock())?,
    };

    if let Some(rmse) = summary.rmse {
        eprintln!("rmse = {rmse:.4}");
    }
    Ok(())
}

fn exit_code(err: &Error) -> u8 {
    match err {
        Error::Io(_) | Error::Internal(_) => 1,
        Error::InvalidInput(_) | Error::CorruptModel(_) | Error::Config(_) => 2,
        Error::Allocation { .. } => 3,
    }
}

fn main() -> ExitCode {
    let mut it = std::env::args();
    let _ = it.next();

    let result = match it.next().as_deref() {
        Some("train") => run_train(it),
        Some("predict") => run_predict(it),
        Some("--help") | None => print_help_and_exit(),
        Some(other) => Err(arg_error(&format!("unknown command {other:?}"))),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("facto: {err}");
            ExitCode::from(exit_code(&err))
        }
    }
}
