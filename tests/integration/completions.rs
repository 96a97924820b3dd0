use clap::CommandFactory;
use clap_complete::aot::generate;

fn completions_for(shell: clap_complete::aot::Shell) -> String {
    let mut buf = Vec::new();
    generate(shell, &mut portrig::cli::Cli::command(), "portrig", &mut buf);
    String::from_utf8(buf).unwrap()
}

#[test]
fn completions_bash_generates_output() {
    let output = completions_for(clap_complete::aot::Shell::Bash);
    assert!(output.contains("portrig"));
    assert!(output.contains("restart"));
}

#[test]
fn completions_zsh_generates_output() {
    let output = completions_for(clap_complete::aot::Shell::Zsh);
    assert!(output.contains("portrig"));
}

#[test]
fn completions_fish_generates_output() {
    let output = completions_for(clap_complete::aot::Shell::Fish);
    assert!(output.contains("portrig"));
    assert!(output.contains("ports"));
}
