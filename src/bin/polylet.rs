use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    polylet::cli::run(std::env::args().skip(1))
}
