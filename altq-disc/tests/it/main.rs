mod control;
mod jobs;
mod priq;
