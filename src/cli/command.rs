use crate::module::process::ProcessLoader;
use crate::platform::PlatformParams;
use crate::worker::{FileUpdate, StepRequest, Worker, WorkerRequest, WorkerResponse};
use ansi_term::Color::{Green, Red};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use structopt::StructOpt;

#[cfg(windows)]
pub fn terminal_init() {
    ansi_term::enable_ansi_support().expect("Could enable terminal ANSI support");
}

#[cfg(not(windows))]
pub fn terminal_init() {}

#[derive(StructOpt, Debug)]
#[structopt(name = "romforge")]
pub enum CommandRoot {
    /// Serve build requests as a worker process (JSON Lines over stdio).
    Worker(SubcommandWorker),
    /// One-shot build of the given sources into a ROM image.
    Build(SubcommandBuild),
}

#[derive(StructOpt, Debug)]
pub struct SubcommandWorker {}

#[derive(StructOpt, Debug)]
pub struct SubcommandBuild {
    /// C (.c) and assembly (.asm) sources; the first one is the main file.
    #[structopt(name = "sources", parse(from_os_str), required = true)]
    sources: Vec<PathBuf>,

    /// Where to write the ROM image.
    #[structopt(short, long, parse(from_os_str), default_value = "out.rom")]
    output: PathBuf,
}

pub fn root(cmd: CommandRoot) -> ! {
    let result = match cmd {
        CommandRoot::Worker(scmd) => worker(scmd),
        CommandRoot::Build(scmd) => build(scmd),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{} {:#}", Red.bold().paint("error:"), err);
            std::process::exit(2);
        }
    }
}

fn new_worker() -> Worker {
    Worker::new(
        Box::new(ProcessLoader::from_env()),
        PlatformParams::default(),
    )
}

fn worker(_cmd: SubcommandWorker) -> Result<i32> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut worker = new_worker();
    worker
        .serve(stdin.lock(), stdout.lock())
        .context("worker loop failed")?;
    Ok(0)
}

fn tool_for_source(path: &str) -> Result<&'static str> {
    if path.ends_with(".c") {
        Ok("sdcpp")
    } else if path.ends_with(".asm") || path.ends_with(".s") {
        Ok("sdasz80")
    } else {
        bail!("don't know how to build '{}'", path)
    }
}

fn build(cmd: SubcommandBuild) -> Result<i32> {
    let mut updates = Vec::new();
    let mut buildsteps = Vec::new();
    for (idx, source) in cmd.sources.iter().enumerate() {
        let path = source.to_string_lossy().into_owned();
        let data = std::fs::read_to_string(source)
            .with_context(|| format!("could not read '{}'", path))?;
        buildsteps.push(StepRequest {
            path: path.clone(),
            files: vec![],
            tool: tool_for_source(&path)?.to_owned(),
            mainfile: idx == 0,
        });
        updates.push(FileUpdate { path, data });
    }

    let mut worker = new_worker();
    let response = worker.handle(WorkerRequest::Build {
        updates,
        setitems: vec![],
        buildsteps,
    });

    match response {
        Some(WorkerResponse::Output {
            output, segments, ..
        }) => {
            std::fs::write(&cmd.output, &output)
                .with_context(|| format!("could not write '{}'", cmd.output.display()))?;
            println!(
                "{} {} ({} bytes)",
                Green.bold().paint("wrote"),
                cmd.output.display(),
                output.len()
            );
            for seg in segments {
                println!(
                    "  {:12} {:04x}..{:04x}{}",
                    seg.name,
                    seg.start,
                    seg.start + seg.size,
                    seg.last
                        .map(|l| format!(" (used to {:04x})", l))
                        .unwrap_or_default()
                );
            }
            Ok(0)
        }
        Some(WorkerResponse::Errors { errors, .. }) => {
            for err in errors {
                eprintln!(
                    "{} {}:{}: {}",
                    Red.bold().paint("error:"),
                    err.path.as_deref().unwrap_or("<unknown>"),
                    err.line,
                    err.msg
                );
            }
            Ok(1)
        }
        Some(WorkerResponse::Unchanged { .. }) => {
            println!("nothing to do");
            Ok(0)
        }
        None => bail!("build request produced no response"),
    }
}
