//! Fixed prompt templates for inference and fine-tuning.
//!
//! A template carries up to two placeholders, `{description}` and `{code}`.
//! Rendering is a single pass over the template text, so placeholder-looking
//! text inside the caller's input is copied through verbatim.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::finetune::TrainingExample;

const DESCRIPTION: &str = "{description}";
const CODE: &str = "{code}";

const ALPACA: &str = "Below is an instruction that describes a task. \
Write a response that appropriately completes the request.\n\n\
### Instruction:\n{description}\n\n### Response:\n";

const VERILOG_CONTEXT: &str = "You are a powerful text-to-Verilog code generation model. \
Your job is to provide Verilog code based on the given description and context code.\n\n\
### Description:\n{description}\n\n\
### Context Code:\n{code}\n\n\
### Generated Verilog Code:\n";

const VERILOG_INPUT: &str = "You are a powerful text-to-verilog code generation model. \
Your job is to provide verilog code. You are given a description to generate the verilog code.\n\n\
You must output the verilog code for given description.\n\n\
### Input:\n{description}\n\n\
### Context:\n{code}\n";

const VERILOG_EVAL: &str = "You are a powerful text-to-verilog code generation model. \
Your job is to provide verilog code. You are given a description to generate the verilog code.\n\n\
You must output the code that answers the question.\n\
### description:\n{description}\n\n\
### code:\n{code}";

const INSTRUCTION_RESPONSE: &str = "### Instruction:\n{description}\n\n### Response:\n{code}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    #[default]
    Alpaca,
    VerilogContext,
    VerilogInput,
    VerilogEval,
    InstructionResponse,
}

impl PromptTemplate {
    pub fn text(self) -> &'static str {
        match self {
            PromptTemplate::Alpaca => ALPACA,
            PromptTemplate::VerilogContext => VERILOG_CONTEXT,
            PromptTemplate::VerilogInput => VERILOG_INPUT,
            PromptTemplate::VerilogEval => VERILOG_EVAL,
            PromptTemplate::InstructionResponse => INSTRUCTION_RESPONSE,
        }
    }

    /// Renders an inference prompt. Templates that also carry a `{code}`
    /// slot get it left empty so the model continues from there.
    pub fn format_instruction(self, instruction: &str) -> String {
        render(self.text(), instruction, "")
    }

    /// Renders a supervised training sample from a dataset record.
    pub fn format_example(self, example: &TrainingExample) -> String {
        render(self.text(), &example.description, &example.code)
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PromptTemplate::Alpaca => "alpaca",
            PromptTemplate::VerilogContext => "verilog_context",
            PromptTemplate::VerilogInput => "verilog_input",
            PromptTemplate::VerilogEval => "verilog_eval",
            PromptTemplate::InstructionResponse => "instruction_response",
        };
        f.write_str(name)
    }
}

impl FromStr for PromptTemplate {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "alpaca" => Ok(PromptTemplate::Alpaca),
            "verilog_context" => Ok(PromptTemplate::VerilogContext),
            "verilog_input" => Ok(PromptTemplate::VerilogInput),
            "verilog_eval" => Ok(PromptTemplate::VerilogEval),
            "instruction_response" => Ok(PromptTemplate::InstructionResponse),
            other => Err(format!("unknown prompt template '{other}'")),
        }
    }
}

fn render(template: &str, description: &str, code: &str) -> String {
    let mut out = String::with_capacity(template.len() + description.len() + code.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix(DESCRIPTION) {
            out.push_str(description);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(CODE) {
            out.push_str(code);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
