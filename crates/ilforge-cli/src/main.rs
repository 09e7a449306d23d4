//! `ilforge` : pilote en ligne de commande
//!
//! Hors du cœur : parsing d'arguments, initialisation des logs, puis
//! délégation aux crates `ilforge-emit` / `ilforge-runtime`.

#![forbid(unsafe_code)]

use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ilforge_core::{disasm::disassemble_full, ValueType};
use ilforge_emit::{FinalizedAssembly, MethodAttributes, Session, SessionOptions, TypeAttributes};
use ilforge_runtime::{Binder, Value};

// ──────────────────────────── CLI (clap) ────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "ilforge", version, about = "ilforge : générer, exécuter et inspecter des méthodes à l'exécution", long_about = None)]
struct Opt {
    /// Augmente la verbosité (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux (erreurs seulement)
    #[arg(short = 'q', long = "quiet", global = true)]
    quiet: bool,

    /// Options de session (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Assembler un corps IL, le lier et l'invoquer
    Run {
        /// Corps en texte assembleur (- pour stdin)
        body: PathBuf,
        /// Nom de l'assembly
        #[arg(long, default_value = "TestAssembly")]
        assembly: String,
        /// Type qualifié (Namespace.Simple)
        #[arg(long = "type", default_value = "TestNamespace.TestType")]
        type_name: String,
        /// Nom de la méthode
        #[arg(long, default_value = "TestMethod")]
        method: String,
        /// Types des paramètres, dans l'ordre
        #[arg(long = "param", default_values = ["i32"])]
        params: Vec<ValueType>,
        /// Sans paramètre du tout
        #[arg(long, conflicts_with = "params")]
        no_params: bool,
        /// Type de retour
        #[arg(long, default_value = "str")]
        returns: ValueType,
        /// Arguments (un par paramètre)
        #[arg(long = "arg", default_values = ["123"])]
        args: Vec<String>,
        /// Persister l'assembly finalisée
        #[arg(long)]
        save: Option<PathBuf>,
        /// Résultat en JSON
        #[arg(long)]
        json: bool,
    },

    /// Lister types et méthodes d'une image ILIMG
    Inspect {
        /// Image (.ilimg)
        image: PathBuf,
        /// Sortie JSON (pretty-printed)
        #[arg(long)]
        json: bool,
    },

    /// Désassembler toutes les méthodes d'une image
    Disasm {
        /// Image (.ilimg)
        image: PathBuf,
    },
}

// ──────────────────────────── Logs ────────────────────────────

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("ILFORGE_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).try_init();
}

// ──────────────────────────── run ────────────────────────────

struct RunRequest<'a> {
    assembly: &'a str,
    type_name: &'a str,
    method: &'a str,
    params: &'a [ValueType],
    returns: ValueType,
    args: &'a [String],
}

fn read_body(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut s = String::new();
        io::stdin().read_to_string(&mut s).context("lecture stdin")?;
        Ok(s)
    } else {
        fs::read_to_string(path).with_context(|| format!("lecture {}", path.display()))
    }
}

fn run_body(req: &RunRequest<'_>, source: &str, options: SessionOptions) -> Result<(Session, Value)> {
    if req.args.len() != req.params.len() {
        bail!("{} argument(s) pour {} paramètre(s)", req.args.len(), req.params.len());
    }
    let args = req
        .params
        .iter()
        .zip(req.args)
        .map(|(ty, text)| Value::parse_as(*ty, text).map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;

    let session = Session::new(req.assembly, options);
    let ty = session.define_type(session.default_module(), req.type_name, TypeAttributes::STATIC_CONTAINER)?;
    let method = session.define_method(
        ty,
        req.method,
        MethodAttributes::PUBLIC | MethodAttributes::STATIC,
        req.returns,
        req.params,
    )?;
    session.with_il(method, |il| il.assemble(source))?.context("assemblage du corps")?;
    session.close(method)?;
    let descriptor = session.finalize_type(ty)?;
    debug!(ty = req.type_name, method = req.method, "finalized");

    let handle = Binder::new().bind_dynamic(&descriptor, req.method, req.params)?;
    let value = handle.invoke(args)?;
    Ok((session, value))
}

// ──────────────────────────── inspect ────────────────────────────

#[derive(Debug, Serialize)]
struct AssemblySummary {
    assembly: String,
    modules: Vec<ModuleSummary>,
}

#[derive(Debug, Serialize)]
struct ModuleSummary {
    name: String,
    types: Vec<TypeSummary>,
}

#[derive(Debug, Serialize)]
struct TypeSummary {
    name: String,
    attributes: Vec<String>,
    methods: Vec<MethodSummary>,
}

#[derive(Debug, Serialize)]
struct MethodSummary {
    name: String,
    signature: String,
    attributes: Vec<String>,
    ops: usize,
    max_stack: u16,
}

fn summarize(asm: &FinalizedAssembly) -> AssemblySummary {
    AssemblySummary {
        assembly: asm.name().to_owned(),
        modules: asm
            .modules()
            .iter()
            .map(|m| ModuleSummary {
                name: m.name().to_owned(),
                types: m
                    .types()
                    .iter()
                    .map(|t| TypeSummary {
                        name: t.full_name().to_owned(),
                        attributes: t.attributes().iter_names().map(|(n, _)| n.to_owned()).collect(),
                        methods: t
                            .methods()
                            .iter()
                            .map(|md| MethodSummary {
                                name: md.name().to_owned(),
                                signature: md.signature().to_string(),
                                attributes: md.attributes().iter_names().map(|(n, _)| n.to_owned()).collect(),
                                ops: md.body().len(),
                                max_stack: md.max_stack(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn render_summary(s: &AssemblySummary) -> String {
    let mut out = format!("assembly {}\n", s.assembly);
    for m in &s.modules {
        out.push_str(&format!("  module {}\n", m.name));
        for t in &m.types {
            out.push_str(&format!("    type {} [{}]\n", t.name, t.attributes.join(" ")));
            for md in &t.methods {
                out.push_str(&format!(
                    "      {} {} [{}] ops={} max_stack={}\n",
                    md.name,
                    md.signature,
                    md.attributes.join(" "),
                    md.ops,
                    md.max_stack
                ));
            }
        }
    }
    out
}

fn disasm_all(asm: &FinalizedAssembly) -> String {
    asm.types()
        .flat_map(|t| t.methods().iter())
        .map(|m| disassemble_full(m.body(), &format!("{} {}", m.qualified_name(), m.signature())))
        .collect::<Vec<_>>()
        .join("\n")
}

// ──────────────────────────── main ────────────────────────────

fn load_options(path: Option<&Path>) -> Result<SessionOptions> {
    path.map_or_else(
        || Ok(SessionOptions::default()),
        |p| SessionOptions::load(p).with_context(|| format!("options {}", p.display())),
    )
}

fn real_main() -> Result<()> {
    let opt = Opt::parse();
    init_tracing(opt.verbose, opt.quiet);
    let options = load_options(opt.config.as_deref())?;

    match opt.cmd {
        Command::Run { body, assembly, type_name, method, params, no_params, returns, args, save, json } => {
            let params = if no_params { Vec::new() } else { params };
            let args = if no_params && args == ["123"] { Vec::new() } else { args };
            let source = read_body(&body)?;
            let req = RunRequest { assembly: &assembly, type_name: &type_name, method: &method, params: &params, returns, args: &args };
            let (session, value) = run_body(&req, &source, options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{value}");
            }
            if let Some(path) = save {
                session.finalize()?;
                session.persist(&path).with_context(|| format!("écriture {}", path.display()))?;
            }
        }
        Command::Inspect { image, json } => {
            let asm = FinalizedAssembly::read_image(&image).with_context(|| format!("lecture {}", image.display()))?;
            let summary = summarize(&asm);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", render_summary(&summary));
            }
        }
        Command::Disasm { image } => {
            let asm = FinalizedAssembly::read_image(&image).with_context(|| format!("lecture {}", image.display()))?;
            print!("{}", disasm_all(&asm));
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    match real_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
