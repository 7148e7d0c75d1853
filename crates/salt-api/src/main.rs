use owo_colors::OwoColorize as _;

fn main() {
  if let Err(err) = salt_api::run() {
    anstream::eprintln!("{}", format!("{err:#}").red());
    std::process::exit(salt_api::exit_code(&err));
  }
}
