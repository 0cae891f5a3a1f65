mod tbr;
mod timer;
