// Build script to compile GLSL shaders to SPIR-V
//
// Every shaders/*.vert and shaders/*.frag becomes <name>.spv next to it.

use std::path::Path;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let Ok(entries) = std::fs::read_dir("shaders") else {
        println!("cargo:warning=No shaders/ directory, skipping shader compilation");
        return;
    };

    let mut sources: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("vert") | Some("frag")
            )
        })
        .collect();
    sources.sort();

    for source in sources {
        let mut output = source.clone().into_os_string();
        output.push(".spv");
        compile_shader(&source, Path::new(&output));
    }
}

fn compile_shader(input: &Path, output: &Path) {
    println!("cargo:rerun-if-changed={}", input.display());

    // glslc ships with the Vulkan SDK
    let result = Command::new("glslc")
        .arg("--target-env=vulkan1.3")
        .arg(input)
        .arg("-o")
        .arg(output)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!(
                "Failed to compile {}: exit code {:?}",
                input.display(),
                status.code()
            );
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({e}), shaders not compiled");
            println!(
                "cargo:warning=Compile manually: glslc {} -o {}",
                input.display(),
                output.display()
            );
        }
    }
}
