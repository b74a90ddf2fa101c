//! External renderer process
//!
//! The avatar goes to the renderer on stdin and the GIF comes back on
//! stdout. Parameters are passed as flags after the configured args.

use crate::cache::key::PetPetParams;
use crate::config::RendererSettings;
use crate::domain::ImageGenerator;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Renderer flags for one parameter set
pub fn render_args(params: &PetPetParams) -> Vec<String> {
    vec![
        "--shift".into(),
        format!("{}x{}", params.shift_x, params.shift_y),
        "--resize".into(),
        format!("{}x{}", params.resize_x, params.resize_y),
        "--squeeze".into(),
        params.squeeze.to_string(),
        "--size".into(),
        params.size.to_string(),
        "--gifsize".into(),
        params.gif_size.to_string(),
        "--fps".into(),
        params.fps.to_string(),
        "--objects".into(),
        params.objects.to_string(),
    ]
}

#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(settings: &RendererSettings) -> Self {
        Self {
            command: settings.command.clone(),
            args: settings.args.clone(),
        }
    }
}

#[async_trait]
impl ImageGenerator for CommandGenerator {
    async fn generate(&self, source: Bytes, params: &PetPetParams) -> Result<Bytes> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .args(render_args(params))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Renderer(format!("failed to start '{}': {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                // a renderer may exit before reading everything
                if let Err(e) = stdin.write_all(&source).await {
                    debug!(error = %e, "Renderer closed stdin early");
                }
            });
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Renderer(format!("renderer I/O: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Renderer(format!(
                "renderer exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(Error::Renderer("renderer produced no output".into()));
        }

        Ok(Bytes::from(output.stdout))
    }

    fn name(&self) -> &str {
        "command"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::Objects;
    use assert_matches::assert_matches;

    fn shell(script: &str) -> CommandGenerator {
        CommandGenerator::new(&RendererSettings {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
        })
    }

    #[test]
    fn test_render_args() {
        let params = PetPetParams {
            shift_x: -3,
            squeeze: 20,
            objects: Objects::Hand,
            ..Default::default()
        };
        let args = render_args(&params);
        assert_eq!(
            args,
            vec![
                "--shift", "-3x0", "--resize", "0x0", "--squeeze", "20", "--size", "100",
                "--gifsize", "128", "--fps", "16", "--objects", "hand",
            ]
        );
    }

    #[tokio::test]
    async fn test_generate_pipes_stdin_to_stdout() {
        let out = shell("cat")
            .generate(Bytes::from_static(b"avatar"), &PetPetParams::default())
            .await
            .unwrap();
        assert_eq!(out.as_ref(), b"avatar");
    }

    #[tokio::test]
    async fn test_generate_receives_flags() {
        // with sh -c the first trailing arg becomes $0
        let out = shell("printf '%s ' \"$0\" \"$@\"")
            .generate(Bytes::new(), &PetPetParams::default())
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&out).trim_end(),
            "--shift 0x0 --resize 0x0 --squeeze 12 --size 100 --gifsize 128 --fps 16 --objects both"
        );
    }

    #[tokio::test]
    async fn test_generate_failure_carries_stderr() {
        let outcome = shell("echo 'bad avatar' >&2; exit 3")
            .generate(Bytes::from_static(b"x"), &PetPetParams::default())
            .await;
        assert_matches!(outcome, Err(Error::Renderer(ref reason)) if reason.contains("bad avatar"));
    }

    #[tokio::test]
    async fn test_generate_empty_output_is_error() {
        let outcome = shell("cat > /dev/null")
            .generate(Bytes::from_static(b"x"), &PetPetParams::default())
            .await;
        assert_matches!(outcome, Err(Error::Renderer(_)));
    }

    #[tokio::test]
    async fn test_generate_missing_binary() {
        let generator = CommandGenerator::new(&RendererSettings {
            command: "/nonexistent/petpet-render".into(),
            args: vec![],
        });
        let outcome = generator.generate(Bytes::new(), &PetPetParams::default()).await;
        assert_matches!(outcome, Err(Error::Renderer(_)));
    }
}
