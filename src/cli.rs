//! Command-line surface: option parsing and the interactive prompt loop.

use std::{
    io::{BufRead, Write},
    net::SocketAddr,
    path::PathBuf,
};

use clap::{Args, Parser, Subcommand};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        DeviceSpec, GenerationConfig, Generator, Precision, QuantizationMode,
        streaming::{NullSink, WriterSink},
    },
    prompt::PromptTemplate,
};

pub const BANNER: &str = "Entering interactive mode. Type 'exit' to quit.";
pub const INPUT_PROMPT: &str = "Enter your description (or type 'exit' to quit): ";
pub const OUTPUT_HEADER: &str = "\n[Generated Code]:\n";
pub const FAREWELL: &str = "Exiting program.";

/// Verilog code generation with a fine-tuned causal language model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate code once or in an interactive loop
    Generate {
        /// Generate for this description and exit
        #[arg(short, long)]
        description: Option<String>,

        /// Print the output in one piece instead of token by token
        #[arg(long)]
        no_stream: bool,

        /// Print only the generated code, without the prompt
        #[arg(long)]
        completion_only: bool,
    },

    /// Serve the web form and JSON API
    Serve {
        #[arg(long, env = "SERVER_ADDR")]
        listen_addr: Option<SocketAddr>,
    },

    /// Fine-tune the model on a JSON or JSON Lines dataset
    Finetune {
        #[arg(long)]
        dataset: PathBuf,

        /// JSON file overriding the default training arguments
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Checkpoint directory to continue from
        #[arg(long)]
        resume_from: Option<PathBuf>,
    },
}

/// Model selection flags shared by every command. Unset flags keep the
/// values read from the environment.
#[derive(Args, Debug, Default, Clone)]
pub struct ModelArgs {
    /// Hub id or local checkpoint directory
    #[arg(long, global = true)]
    pub model_id: Option<String>,

    #[arg(long, global = true)]
    pub template: Option<PromptTemplate>,

    #[arg(long, global = true)]
    pub device: Option<DeviceSpec>,

    #[arg(long, global = true)]
    pub precision: Option<Precision>,

    #[arg(long, global = true)]
    pub quantization: Option<QuantizationMode>,

    #[arg(long, global = true)]
    pub seed: Option<u64>,
}

impl ModelArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(model_id) = &self.model_id {
            config.model_id = model_id.clone();
        }
        if let Some(template) = self.template {
            config.template = template;
        }
        if let Some(device) = self.device {
            config.load.device = device;
        }
        if let Some(precision) = self.precision {
            config.load.precision = precision;
        }
        if let Some(quantization) = self.quantization {
            config.load.quantization = quantization;
        }
        if self.seed.is_some() {
            config.generation.seed = self.seed;
        }
    }
}

/// Whether an input line ends the interactive loop.
pub fn is_exit_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("exit")
}

/// How generated text is written to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintOptions {
    pub stream: bool,
    /// Omit the prompt and print the completion alone.
    pub completion_only: bool,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            stream: true,
            completion_only: false,
        }
    }
}

/// Reads descriptions line by line until `exit` or end of input, handing
/// each one to `generate` together with the output writer.
pub fn run_interactive<R, W, F>(mut input: R, output: &mut W, mut generate: F) -> anyhow::Result<()>
where
    R: BufRead,
    W: Write,
    F: FnMut(&str, &mut W) -> anyhow::Result<()>,
{
    writeln!(output, "{BANNER}")?;
    let mut line = String::new();
    loop {
        write!(output, "{INPUT_PROMPT}")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 || is_exit_command(&line) {
            writeln!(output, "{FAREWELL}")?;
            return Ok(());
        }

        generate(line.trim_end_matches(['\r', '\n']), output)?;
    }
}

/// Generates for one description and writes the header followed by the
/// decoded text (prompt and completion unless `completion_only` is set).
pub fn write_generation<W: Write>(
    generator: &Generator,
    config: &GenerationConfig,
    description: &str,
    options: PrintOptions,
    output: &mut W,
) -> Result<(), ServiceError> {
    write!(output, "{OUTPUT_HEADER}")?;
    let response = if options.stream {
        if !options.completion_only {
            let prompt = generator.template().format_instruction(description);
            write!(output, "{prompt}")?;
        }
        let mut sink = WriterSink::new(&mut *output);
        generator.generate(description, config, &mut sink)?
    } else {
        let response = generator.generate(description, config, &mut NullSink)?;
        if options.completion_only {
            writeln!(output, "{}", response.completion)?;
        } else {
            writeln!(output, "{}", response.text)?;
        }
        response
    };
    tracing::debug!(
        tokens = response.tokens_generated,
        finish_reason = ?response.finish_reason,
        tokens_per_second = response.tokens_per_second,
        "generation finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, sync::Arc};

    use super::*;
    use crate::model::testing::{ByteCodec, ScriptedModel};

    #[test]
    fn exit_is_trimmed_and_case_insensitive() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("  EXIT \n"));
        assert!(is_exit_command("Exit\r\n"));
        assert!(!is_exit_command("exit now"));
        assert!(!is_exit_command("quit"));
        assert!(!is_exit_command(""));
    }

    #[test]
    fn loop_generates_until_exit() {
        let input = Cursor::new("a nand gate\n  a mux\nExit\nnever read\n");
        let mut output = Vec::new();
        let mut seen = Vec::new();
        run_interactive(input, &mut output, |description, out| {
            seen.push(description.to_string());
            writeln!(out, "module m; endmodule")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, vec!["a nand gate", "  a mux"]);
        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("Entering interactive mode. Type 'exit' to quit.\n"));
        assert_eq!(text.matches(INPUT_PROMPT).count(), 3);
        assert_eq!(text.matches("module m; endmodule").count(), 2);
        assert!(text.ends_with("Exiting program.\n"));
    }

    #[test]
    fn loop_ends_at_end_of_input() {
        let mut output = Vec::new();
        let mut calls = 0;
        run_interactive(Cursor::new("an adder"), &mut output, |_, _| {
            calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert!(String::from_utf8(output).unwrap().ends_with("Exiting program.\n"));
    }

    #[test]
    fn generation_errors_stop_the_loop() {
        let mut output = Vec::new();
        let result = run_interactive(Cursor::new("x\ny\n"), &mut output, |_, _| {
            anyhow::bail!("device lost")
        });
        assert!(result.is_err());
    }

    #[test]
    fn streamed_and_buffered_output_match() {
        let description = "an inverter";
        let prompt = PromptTemplate::Alpaca.format_instruction(description);
        let generator = Generator::new(
            Arc::new(ScriptedModel::new(&prompt, "assign y = ~a;")),
            Arc::new(ByteCodec),
            PromptTemplate::Alpaca,
            4096,
        );
        let config = GenerationConfig {
            do_sample: false,
            ..GenerationConfig::default()
        };

        let run = |stream: bool, completion_only: bool| {
            let mut out = Vec::new();
            let options = PrintOptions {
                stream,
                completion_only,
            };
            write_generation(&generator, &config, description, options, &mut out).unwrap();
            String::from_utf8(out).unwrap()
        };

        let streamed = run(true, false);
        assert_eq!(streamed, format!("\n[Generated Code]:\n{prompt}assign y = ~a;\n"));
        assert_eq!(streamed, run(false, false));

        let completion = run(true, true);
        assert_eq!(completion, "\n[Generated Code]:\nassign y = ~a;\n");
        assert_eq!(completion, run(false, true));
    }

    #[test]
    fn flags_override_environment() {
        let mut config = AppConfig::from_lookup(|_| None);
        let cli = Cli::parse_from([
            "verilog_codegen",
            "generate",
            "--model-id",
            "verilog-code-llama",
            "--template",
            "verilog-eval",
            "--device",
            "cpu",
            "-d",
            "a latch",
        ]);
        cli.model.apply(&mut config);
        assert_eq!(config.model_id, "verilog-code-llama");
        assert_eq!(config.template, PromptTemplate::VerilogEval);
        assert_eq!(config.load.device, DeviceSpec::Cpu);
        assert!(matches!(
            cli.command,
            Commands::Generate {
                description: Some(ref d),
                no_stream: false,
                completion_only: false,
            } if d == "a latch"
        ));
        assert!(PrintOptions::default().stream);
    }
}
