use minijinja::{Environment, context};
use minijinja_contrib::pycompat::unknown_method_callback;

use super::RunnerError;
use crate::{backends::Token, tokenizer::TokenCodec};

const TEMPLATE_NAME: &str = "prompt_template";

/// Turns a user prompt and an optional system prompt into prompt tokens.
///
/// Without a template the system prompt is encoded with the BOS token and
/// the user prompt is appended without one. With a template both strings
/// are rendered into a single text that is encoded once.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    template: Option<String>,
}

impl PromptBuilder {
    pub fn new(template: Option<String>) -> Result<Self, minijinja::Error> {
        if let Some(template) = &template {
            let mut environment = Environment::new();
            environment.add_template(TEMPLATE_NAME, template.as_str())?;
        }
        Ok(Self {
            template,
        })
    }

    pub fn render(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<Option<String>, minijinja::Error> {
        let Some(template) = &self.template else {
            return Ok(None);
        };
        let mut environment = Environment::new();
        environment.set_unknown_method_callback(unknown_method_callback);
        environment.add_template(TEMPLATE_NAME, template.as_str())?;
        let template = environment.get_template(TEMPLATE_NAME)?;
        let result = template.render(context!(
            prompt => prompt,
            system_prompt => system_prompt.unwrap_or_default(),
        ))?;
        Ok(Some(result))
    }

    /// An empty system prompt is the same as none.
    pub fn build(
        &self,
        codec: &dyn TokenCodec,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<Vec<Token>, RunnerError> {
        let system_prompt = system_prompt.filter(|text| !text.is_empty());
        if let Some(text) = self.render(prompt, system_prompt)? {
            return Ok(codec.encode(&text, true)?);
        }

        match system_prompt {
            Some(system_prompt) => {
                let mut tokens = codec.encode(system_prompt, true)?;
                tokens.extend(codec.encode(prompt, false)?);
                Ok(tokens)
            },
            None => Ok(codec.encode(prompt, true)?),
        }
    }
}
